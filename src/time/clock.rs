use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::{ConcentratorTime, GpsTime, XTime};
use crate::core::{ClockConfig, Error, Result, SessionId};

/// Inverse gain of the epoch low-pass filter
const CORRECTION_GAIN: i64 = 8;

/// Outcome of one synchronization sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// First sample of the session, the epoch was established
    Anchored,
    /// The epoch moved by a fraction of the observed error
    Corrected { correction_us: i64 },
    /// Concentrator time went backwards, the epoch was reset
    Rollover,
    /// The observed error exceeded the correction limit, the epoch was reset
    Reanchored,
}

/// Synchronization statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockStats {
    pub sync_count: u64,
    pub rollovers: u64,
    pub reanchors: u64,
    pub rejected_round_trips: u64,
    pub last_round_trip: Option<Duration>,
    pub last_correction_us: i64,
}

/// Mapping between wall clock, concentrator time and GPS time of one session
///
/// The epoch is the wall clock instant, in microseconds since the Unix
/// epoch, at which the concentrator counter read zero.
#[derive(Debug)]
pub struct ClockModel {
    session_id: SessionId,
    config: ClockConfig,
    epoch: Option<i64>,
    last_concentrator_time: Option<ConcentratorTime>,
    gps_anchor: Option<(ConcentratorTime, GpsTime)>,
    stats: ClockStats,
}

impl ClockModel {
    pub fn new(session_id: SessionId, config: ClockConfig) -> Self {
        ClockModel {
            session_id,
            config,
            epoch: None,
            last_concentrator_time: None,
            gps_anchor: None,
            stats: ClockStats::default(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns whether at least one sync established the epoch
    pub fn is_synced(&self) -> bool {
        self.epoch.is_some()
    }

    pub fn last_concentrator_time(&self) -> Option<ConcentratorTime> {
        self.last_concentrator_time
    }

    pub fn stats(&self) -> &ClockStats {
        &self.stats
    }

    /// Refines the epoch from a concentrator timestamp observed at `wall`
    pub fn sync_from_uplink(&mut self, concentrator_time: ConcentratorTime, wall: DateTime<Utc>) -> SyncOutcome {
        let observed = wall.timestamp_micros() - concentrator_time;
        let max_correction = self.config.max_correction.as_micros() as i64;

        let outcome = match (self.epoch, self.last_concentrator_time) {
            (None, _) => {
                self.epoch = Some(observed);
                SyncOutcome::Anchored
            }
            (Some(_), Some(last)) if concentrator_time < last => {
                debug!(
                    session_id = %self.session_id,
                    last,
                    concentrator_time,
                    "Concentrator time rollover"
                );
                self.epoch = Some(observed);
                self.gps_anchor = None;
                self.stats.rollovers += 1;
                SyncOutcome::Rollover
            }
            (Some(epoch), _) => {
                let error = observed - epoch;
                if error.abs() > max_correction {
                    debug!(session_id = %self.session_id, error_us = error, "Clock re-anchored");
                    self.epoch = Some(observed);
                    self.stats.reanchors += 1;
                    SyncOutcome::Reanchored
                } else {
                    let correction_us = error / CORRECTION_GAIN;
                    self.epoch = Some(epoch + correction_us);
                    self.stats.last_correction_us = correction_us;
                    SyncOutcome::Corrected { correction_us }
                }
            }
        };

        self.last_concentrator_time = Some(concentrator_time);
        self.stats.sync_count += 1;
        trace!(session_id = %self.session_id, ?outcome, "Clock synced");
        outcome
    }

    /// Syncs from a round trip: the concentrator time is assumed to have been
    /// sampled halfway between `sent_at` and `received_at`
    ///
    /// Returns `None` when the sample is discarded because the round trip was
    /// negative or slower than the configured maximum.
    pub fn sync_round_trip(
        &mut self,
        concentrator_time: ConcentratorTime,
        sent_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> Option<SyncOutcome> {
        let rtt = match (received_at - sent_at).to_std() {
            Ok(rtt) if rtt <= self.config.max_round_trip => rtt,
            _ => {
                self.stats.rejected_round_trips += 1;
                debug!(session_id = %self.session_id, "Round trip sample rejected");
                return None;
            }
        };
        self.stats.last_round_trip = Some(rtt);

        let midpoint = sent_at + (received_at - sent_at) / 2;
        Some(self.sync_from_uplink(concentrator_time, midpoint))
    }

    /// Records the GPS time at which the concentrator counter read `concentrator_time`
    pub fn sync_gps(&mut self, concentrator_time: ConcentratorTime, gps: GpsTime) {
        self.gps_anchor = Some((concentrator_time, gps));
    }

    pub fn to_wall_clock(&self, concentrator_time: ConcentratorTime) -> Result<DateTime<Utc>> {
        let epoch = self.epoch.ok_or(Error::ClockNotSynchronized)?;
        epoch
            .checked_add(concentrator_time)
            .and_then(DateTime::<Utc>::from_timestamp_micros)
            .ok_or_else(|| {
                Error::TimeOutOfRange(format!("concentrator time {} us", concentrator_time))
            })
    }

    pub fn from_wall_clock(&self, wall: DateTime<Utc>) -> Result<ConcentratorTime> {
        let epoch = self.epoch.ok_or(Error::ClockNotSynchronized)?;
        Ok(wall.timestamp_micros() - epoch)
    }

    /// Converts concentrator time to GPS time, preferring the GPS anchor
    ///
    /// Fails with [`Error::ClockNotSynchronized`] until the epoch is known,
    /// even when a GPS anchor was already recorded.
    pub fn to_gps(&self, concentrator_time: ConcentratorTime) -> Result<GpsTime> {
        if !self.is_synced() {
            return Err(Error::ClockNotSynchronized);
        }
        match self.gps_anchor {
            Some((anchor_time, anchor_gps)) => Ok(anchor_gps.add_micros(concentrator_time - anchor_time)),
            None => self.to_wall_clock(concentrator_time).map(GpsTime::from_utc),
        }
    }

    /// Converts GPS time to concentrator time, preferring the GPS anchor
    pub fn from_gps(&self, gps: GpsTime) -> Result<ConcentratorTime> {
        if !self.is_synced() {
            return Err(Error::ClockNotSynchronized);
        }
        match self.gps_anchor {
            Some((anchor_time, anchor_gps)) => Ok(anchor_time + gps.micros_since(anchor_gps)),
            None => self.from_wall_clock(gps.to_utc()?),
        }
    }

    /// Encodes a concentrator time of this session as XTime
    pub fn encode_xtime(&self, concentrator_time: ConcentratorTime) -> Result<XTime> {
        XTime::encode(self.session_id, concentrator_time)
    }

    pub fn is_current_session(&self, xtime: XTime) -> bool {
        xtime.session_id() == self.session_id
    }

    /// Returns the concentrator time of an XTime echoed by this session,
    /// or `None` for values minted by an earlier session
    pub fn current_session_time(&self, xtime: XTime) -> Option<ConcentratorTime> {
        self.is_current_session(xtime)
            .then(|| xtime.concentrator_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn wall(secs: i64, micros: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap() + chrono::Duration::microseconds(micros)
    }

    fn model() -> ClockModel {
        ClockModel::new(SessionId(0x11), ClockConfig::default())
    }

    #[test]
    fn test_unsynced() {
        let clock = model();
        assert!(!clock.is_synced());
        assert!(matches!(clock.to_wall_clock(0), Err(Error::ClockNotSynchronized)));
        assert!(matches!(clock.from_wall_clock(wall(0, 0)), Err(Error::ClockNotSynchronized)));
        assert!(matches!(
            clock.from_gps(GpsTime::from_micros(0)),
            Err(Error::ClockNotSynchronized)
        ));
    }

    #[test]
    fn test_first_sync_defines_epoch() {
        let mut clock = model();
        let w0 = wall(1_554_300_787, 0);
        assert_eq!(clock.sync_from_uplink(5_000_000, w0), SyncOutcome::Anchored);

        assert_eq!(clock.to_wall_clock(5_000_000).unwrap(), w0);
        assert_eq!(clock.to_wall_clock(6_000_000).unwrap(), wall(1_554_300_788, 0));
        assert_eq!(clock.from_wall_clock(w0).unwrap(), 5_000_000);
    }

    #[test]
    fn test_low_pass_correction() {
        let mut clock = model();
        clock.sync_from_uplink(0, wall(1000, 0));
        // 800 us late: the epoch moves by 1/8 of the error
        let outcome = clock.sync_from_uplink(1_000_000, wall(1001, 800));
        assert_eq!(outcome, SyncOutcome::Corrected { correction_us: 100 });
        assert_eq!(clock.to_wall_clock(0).unwrap(), wall(1000, 100));
        assert_eq!(clock.stats().sync_count, 2);
    }

    #[test]
    fn test_rollover_resets_epoch() {
        let mut clock = model();
        clock.sync_from_uplink(10_000_000, wall(1000, 0));
        clock.sync_gps(10_000_000, GpsTime::from_micros(42));

        let outcome = clock.sync_from_uplink(1_000, wall(2000, 0));
        assert_eq!(outcome, SyncOutcome::Rollover);
        assert_eq!(clock.to_wall_clock(1_000).unwrap(), wall(2000, 0));
        assert_eq!(clock.stats().rollovers, 1);
        // the GPS anchor belonged to the previous counter
        assert_eq!(clock.to_gps(1_000).unwrap(), GpsTime::from_utc(wall(2000, 0)));
    }

    #[test]
    fn test_large_error_reanchors() {
        let mut clock = model();
        clock.sync_from_uplink(0, wall(1000, 0));
        let outcome = clock.sync_from_uplink(1_000_000, wall(1011, 0));
        assert_eq!(outcome, SyncOutcome::Reanchored);
        assert_eq!(clock.to_wall_clock(1_000_000).unwrap(), wall(1011, 0));
    }

    #[test]
    fn test_round_trip_midpoint() {
        let mut clock = model();
        let sent = wall(1000, 0);
        let received = wall(1000, 200_000);
        let outcome = clock.sync_round_trip(7_000_000, sent, received);
        assert_eq!(outcome, Some(SyncOutcome::Anchored));
        assert_eq!(clock.to_wall_clock(7_000_000).unwrap(), wall(1000, 100_000));
        assert_eq!(clock.stats().last_round_trip, Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_slow_round_trip_rejected() {
        let mut clock = model();
        assert_eq!(clock.sync_round_trip(0, wall(1000, 0), wall(1001, 0)), None);
        assert_eq!(clock.sync_round_trip(0, wall(1001, 0), wall(1000, 0)), None);
        assert!(!clock.is_synced());
        assert_eq!(clock.stats().rejected_round_trips, 2);
    }

    #[test]
    fn test_gps_anchor() {
        let mut clock = model();
        let gps = GpsTime::from_micros(1_000_000_000);
        clock.sync_gps(2_000_000, gps);

        // an anchor alone does not synchronize the clock
        assert!(matches!(clock.to_gps(3_000_000), Err(Error::ClockNotSynchronized)));
        assert!(matches!(clock.from_gps(gps), Err(Error::ClockNotSynchronized)));

        // the anchor wins over the wall clock once the epoch is known
        clock.sync_from_uplink(2_000_000, wall(1_554_300_787, 0));
        assert_eq!(clock.to_gps(3_000_000).unwrap(), gps.add_micros(1_000_000));
        assert_eq!(clock.from_gps(gps.add_micros(500)).unwrap(), 2_000_500);
    }

    #[test]
    fn test_gps_via_wall_clock() {
        let mut clock = model();
        let w0 = wall(1_554_300_787, 0);
        clock.sync_from_uplink(0, w0);
        let gps = GpsTime::from_utc(w0 + chrono::Duration::seconds(2));
        assert_eq!(clock.from_gps(gps).unwrap(), 2_000_000);
        assert_eq!(clock.to_gps(2_000_000).unwrap(), gps);
    }

    #[test]
    fn test_xtime_session() {
        let clock = model();
        let xtime = clock.encode_xtime(890).unwrap();
        assert!(clock.is_current_session(xtime));
        assert_eq!(clock.current_session_time(xtime), Some(890));

        let stale = XTime::encode(SessionId(0x10), 890).unwrap();
        assert!(!clock.is_current_session(stale));
        assert_eq!(clock.current_session_time(stale), None);
    }
}
