//! Concentrator clock and time conversions
//!
//! A gateway timestamps radio events with a free-running microsecond counter,
//! the concentrator time. This module maps that counter to the network
//! server's wall clock and to GPS time:
//!
//! - [`ClockModel`] keeps the per-session epoch, refined by every uplink and
//!   round trip with a low-pass filter and reset on counter rollover
//! - [`GpsTime`] converts between GPS and UTC instants
//! - [`XTime`] packs a session id and a concentrator time into one wire value
//!
//! # Examples
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use lorawan_gs::core::{ClockConfig, SessionId};
//! use lorawan_gs::time::ClockModel;
//!
//! let mut clock = ClockModel::new(SessionId(0x42), ClockConfig::default());
//! let now = Utc.timestamp_opt(1_554_300_787, 0).unwrap();
//! clock.sync_from_uplink(1_000_000, now);
//!
//! let xtime = clock.encode_xtime(2_000_000).unwrap();
//! assert_eq!(xtime.session_id(), SessionId(0x42));
//! assert_eq!(clock.to_wall_clock(1_000_000).unwrap(), now);
//! ```

mod clock;
mod gps;
mod xtime;

pub use self::clock::{ClockModel, ClockStats, SyncOutcome};
pub use self::gps::{GpsTime, LEAP_SECONDS};
pub use self::xtime::XTime;

/// Gateway-local concentrator time in microseconds
pub type ConcentratorTime = i64;

/// Utility functions for time representation on the wire
pub mod util {
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    use crate::core::{Error, Result};

    /// Converts an instant to fractional Unix seconds
    pub fn to_unix_seconds(time: DateTime<Utc>) -> f64 {
        time.timestamp_micros() as f64 / 1e6
    }

    /// Converts fractional Unix seconds to an instant, at microsecond precision
    pub fn from_unix_seconds(secs: f64) -> Result<DateTime<Utc>> {
        if !secs.is_finite() {
            return Err(Error::TimeOutOfRange(format!("{} s", secs)));
        }
        DateTime::<Utc>::from_timestamp_micros((secs * 1e6).round() as i64)
            .ok_or_else(|| Error::TimeOutOfRange(format!("{} s", secs)))
    }

    /// Converts a duration to whole microseconds of concentrator time
    pub fn to_micros(duration: Duration) -> i64 {
        i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
    }
}
