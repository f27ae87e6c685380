use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Seconds GPS time runs ahead of UTC
pub const LEAP_SECONDS: i64 = 18;

/// Unix timestamp of the GPS epoch, 1980-01-06T00:00:00Z
const GPS_EPOCH_UNIX_SECS: i64 = 315_964_800;

const MICROS_PER_SEC: i64 = 1_000_000;

/// GPS time in microseconds since the GPS epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GpsTime(i64);

impl GpsTime {
    pub const fn from_micros(micros: i64) -> Self {
        GpsTime(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Seconds since the GPS epoch, as used for beacon timing
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_SEC as f64
    }

    /// Converts a UTC instant to GPS time
    pub fn from_utc(time: DateTime<Utc>) -> Self {
        GpsTime(time.timestamp_micros() - (GPS_EPOCH_UNIX_SECS - LEAP_SECONDS) * MICROS_PER_SEC)
    }

    /// Converts GPS time to a UTC instant
    pub fn to_utc(self) -> Result<DateTime<Utc>> {
        self.0
            .checked_add((GPS_EPOCH_UNIX_SECS - LEAP_SECONDS) * MICROS_PER_SEC)
            .and_then(DateTime::<Utc>::from_timestamp_micros)
            .ok_or_else(|| Error::TimeOutOfRange(format!("GPS time {} us", self.0)))
    }

    /// Difference `self - other` in microseconds
    pub fn micros_since(self, other: GpsTime) -> i64 {
        self.0 - other.0
    }

    pub fn add_micros(self, micros: i64) -> Self {
        GpsTime(self.0 + micros)
    }
}

impl fmt::Display for GpsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s GPS", self.as_secs_f64())
    }
}
