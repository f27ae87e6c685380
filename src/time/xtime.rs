use std::fmt;

use serde::{Deserialize, Serialize};

use super::ConcentratorTime;
use crate::core::{Error, Result, SessionId};

const TIME_BITS: u32 = 48;
const TIME_MASK: i64 = (1 << TIME_BITS) - 1;

/// Session id and concentrator time packed into one wire counter
///
/// Bits 0-47 carry the concentrator time in microseconds, bits 48-55 the
/// session id. The top byte is always zero, so the value is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XTime(pub i64);

impl XTime {
    /// Largest concentrator time that can be encoded
    pub const MAX_CONCENTRATOR_TIME: ConcentratorTime = TIME_MASK;

    /// Packs a session id and a concentrator time
    pub fn encode(session_id: SessionId, concentrator_time: ConcentratorTime) -> Result<Self> {
        if !(0..=TIME_MASK).contains(&concentrator_time) {
            return Err(Error::ConcentratorTimeOutOfRange(concentrator_time));
        }
        Ok(XTime(((session_id.0 as i64) << TIME_BITS) | concentrator_time))
    }

    /// Unpacks the session id and concentrator time
    pub fn decode(self) -> (SessionId, ConcentratorTime) {
        (self.session_id(), self.concentrator_time())
    }

    pub fn session_id(self) -> SessionId {
        SessionId(((self.0 >> TIME_BITS) & 0xFF) as u8)
    }

    pub fn concentrator_time(self) -> ConcentratorTime {
        self.0 & TIME_MASK
    }
}

impl fmt::Display for XTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id(), self.concentrator_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let xtime = XTime::encode(SessionId(0x42), 890).unwrap();
        assert_eq!(xtime.0, 0x0042_0000_0000_037A);
        assert_eq!(xtime.session_id(), SessionId(0x42));
        assert_eq!(xtime.concentrator_time(), 890);
        assert_eq!(xtime.to_string(), "0x42/890");
    }

    #[test]
    fn test_decode_recovers_every_session() {
        let times = [0, 1, 1_000_000, 0x1234_5678_9ABC, XTime::MAX_CONCENTRATOR_TIME];
        for id in 0..=u8::MAX {
            for time in times {
                let xtime = XTime::encode(SessionId(id), time).unwrap();
                assert!(xtime.0 >= 0);
                assert_eq!(xtime.decode(), (SessionId(id), time));
            }
        }
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            XTime::encode(SessionId(1), -1),
            Err(Error::ConcentratorTimeOutOfRange(-1))
        ));
        assert!(XTime::encode(SessionId(1), XTime::MAX_CONCENTRATOR_TIME + 1).is_err());
    }

    #[test]
    fn test_serializes_as_integer() {
        let xtime = XTime::encode(SessionId(1), 5).unwrap();
        let json = serde_json::to_string(&xtime).unwrap();
        assert_eq!(json, (1i64 << 48 | 5).to_string());
    }
}
