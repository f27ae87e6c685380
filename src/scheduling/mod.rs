//! Downlink scheduling
//!
//! The [`Scheduler`] turns a [`DownlinkRequest`] into a committed [`Slot`]
//! or a rejection. Class A requests answer a specific uplink in RX1 or, as a
//! fallback, RX2; scheduled requests (class B and C) name an absolute time.
//! Every candidate is checked for payload size, timing, sub-band duty cycle
//! and antenna occupancy before the most preferred eligible one is committed.

mod airtime;
mod duty_cycle;
mod scheduler;

pub use self::airtime::{airtime, coding_rate_denominator};
pub use self::duty_cycle::{DutyCycle, Emission};
pub use self::scheduler::{Scheduler, SchedulerState};

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::band::{DataRate, SubBand};
use crate::core::{DeviceIds, Priority};
use crate::time::{ConcentratorTime, GpsTime};

/// LoRaWAN device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    A,
    B,
    C,
}

impl DeviceClass {
    /// Numeric class as carried on the wire
    pub fn as_u8(&self) -> u8 {
        match self {
            DeviceClass::A => 0,
            DeviceClass::B => 1,
            DeviceClass::C => 2,
        }
    }
}

/// Reference to the uplink a class A downlink answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkToken {
    /// Concentrator time at which the uplink was received
    pub concentrator_time: ConcentratorTime,
    /// Uplink frequency in Hz
    pub frequency: u64,
    /// Uplink channel index, when the band maps RX1 by channel
    pub channel_index: Option<u8>,
    /// Uplink data rate index
    pub data_rate_index: u8,
}

/// Absolute transmission time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsoluteTime {
    Wall(DateTime<Utc>),
    Gps(GpsTime),
}

/// How a downlink is to be timed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmissionMode {
    /// Reply in RX1, or RX2 as a fallback, after an uplink
    ClassA {
        uplink: UplinkToken,
        rx1_offset: u8,
        dwell_time: bool,
        /// Use the join-accept delays instead of the receive delays
        join_accept: bool,
    },
    /// Transmit at an absolute time; frequency and data rate default to the
    /// ping slot (class B) or RX2 (class C) parameters of the band
    Scheduled {
        at: AbsoluteTime,
        class: DeviceClass,
        frequency: Option<u64>,
        data_rate_index: Option<u8>,
    },
}

/// A request to transmit one downlink through one gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkRequest {
    pub device: DeviceIds,
    pub payload: Bytes,
    pub mode: TransmissionMode,
    pub priority: Priority,
    pub antenna: u8,
}

impl DownlinkRequest {
    /// Creates a class A reply with offset 0, no dwell time limit and normal priority
    pub fn class_a(device: DeviceIds, payload: impl Into<Bytes>, uplink: UplinkToken) -> Self {
        DownlinkRequest {
            device,
            payload: payload.into(),
            mode: TransmissionMode::ClassA {
                uplink,
                rx1_offset: 0,
                dwell_time: false,
                join_accept: false,
            },
            priority: Priority::Normal,
            antenna: 0,
        }
    }

    /// Creates an absolute-time downlink with the band's default radio parameters
    pub fn scheduled(
        device: DeviceIds,
        payload: impl Into<Bytes>,
        at: AbsoluteTime,
        class: DeviceClass,
    ) -> Self {
        DownlinkRequest {
            device,
            payload: payload.into(),
            mode: TransmissionMode::Scheduled {
                at,
                class,
                frequency: None,
                data_rate_index: None,
            },
            priority: Priority::Normal,
            antenna: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_antenna(mut self, antenna: u8) -> Self {
        self.antenna = antenna;
        self
    }

    /// Sets the RX1 data rate offset of a class A request
    pub fn with_rx1_offset(mut self, offset: u8) -> Self {
        if let TransmissionMode::ClassA { rx1_offset, .. } = &mut self.mode {
            *rx1_offset = offset;
        }
        self
    }

    /// Enables the dwell time limit of a class A request
    pub fn with_dwell_time(mut self, enabled: bool) -> Self {
        if let TransmissionMode::ClassA { dwell_time, .. } = &mut self.mode {
            *dwell_time = enabled;
        }
        self
    }

    /// Marks a class A request as a join-accept
    pub fn as_join_accept(mut self) -> Self {
        if let TransmissionMode::ClassA { join_accept, .. } = &mut self.mode {
            *join_accept = true;
        }
        self
    }

    pub fn device_class(&self) -> DeviceClass {
        match self.mode {
            TransmissionMode::ClassA { .. } => DeviceClass::A,
            TransmissionMode::Scheduled { class, .. } => class,
        }
    }
}

/// Receive window a slot was placed in; RX1 is preferred over RX2
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Window {
    Rx1,
    Rx2,
    Scheduled,
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Window::Rx1 => "RX1",
            Window::Rx2 => "RX2",
            Window::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

/// A committed transmission
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub window: Window,
    /// Concentrator time at which transmission starts
    pub concentrator_time: ConcentratorTime,
    /// Wall clock time at which transmission starts
    pub transmit_at: DateTime<Utc>,
    pub airtime: Duration,
    pub frequency: u64,
    pub data_rate_index: u8,
    pub data_rate: DataRate,
    pub antenna: u8,
    pub priority: Priority,
    pub sub_band: SubBand,
}

impl Slot {
    /// Concentrator time at which transmission ends
    pub fn end(&self) -> ConcentratorTime {
        self.concentrator_time + crate::time::util::to_micros(self.airtime)
    }

    pub fn emission(&self) -> Emission {
        Emission {
            start: self.concentrator_time,
            end: self.end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let uplink = UplinkToken {
            concentrator_time: 1_000,
            frequency: 868_100_000,
            channel_index: None,
            data_rate_index: 5,
        };
        let request = DownlinkRequest::class_a(DeviceIds::new("dev"), vec![1, 2, 3], uplink)
            .with_rx1_offset(2)
            .with_dwell_time(true)
            .as_join_accept()
            .with_priority(Priority::High)
            .with_antenna(1);

        assert_eq!(request.device_class(), DeviceClass::A);
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.antenna, 1);
        assert_eq!(
            request.mode,
            TransmissionMode::ClassA {
                uplink,
                rx1_offset: 2,
                dwell_time: true,
                join_accept: true
            }
        );
    }

    #[test]
    fn test_scheduled_ignores_class_a_options() {
        let at = AbsoluteTime::Gps(GpsTime::from_micros(0));
        let request = DownlinkRequest::scheduled(DeviceIds::new("dev"), Bytes::new(), at, DeviceClass::C)
            .with_rx1_offset(3);
        assert_eq!(request.device_class(), DeviceClass::C);
        assert!(matches!(request.mode, TransmissionMode::Scheduled { frequency: None, .. }));
    }

    #[test]
    fn test_window_preference() {
        assert!(Window::Rx1 < Window::Rx2);
        assert_eq!(Window::Rx2.to_string(), "RX2");
        assert_eq!(DeviceClass::C.as_u8(), 2);
    }
}
