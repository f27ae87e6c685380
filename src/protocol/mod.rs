//! Gateway protocol
//!
//! Gateways exchange length-prefixed [`WireFrame`]s with the server. Data
//! frames are translated by a [`Formatter`], which knows one bridge wire
//! format; [`JsonFormatter`] implements an LNS-style JSON dialect.

pub mod codec;
pub mod json;
pub mod message;

pub use self::codec::FrameCodec;
pub use self::json::JsonFormatter;
pub use self::message::{FrameKind, WireFrame};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::band::Band;
use crate::core::{DeviceIds, Priority, Result, SessionId};
use crate::scheduling::{DeviceClass, DownlinkRequest, Slot, TransmissionMode, UplinkToken, Window};
use crate::time::{ConcentratorTime, GpsTime, XTime};

/// Per-session values a formatter needs, passed explicitly on every call
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub band_id: &'static str,
    pub band: &'static Band,
}

impl SessionContext {
    pub fn new(session_id: SessionId, band: &'static Band) -> Self {
        SessionContext {
            session_id,
            band_id: band.id,
            band,
        }
    }
}

/// An uplink as received by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkMessage {
    pub payload: Bytes,
    pub frequency: u64,
    pub data_rate_index: u8,
    /// Uplink channel index, when the frequency is one of the band's channels
    pub channel_index: Option<u8>,
    pub antenna: u8,
    /// Concentrator time at which the uplink was received
    pub concentrator_time: ConcentratorTime,
    pub gps_time: Option<GpsTime>,
    pub rssi: f32,
    pub snr: f32,
    /// Server time at which the message was decoded
    pub received_at: DateTime<Utc>,
}

impl UplinkMessage {
    /// Token a class A reply to this uplink refers to
    pub fn token(&self) -> UplinkToken {
        UplinkToken {
            concentrator_time: self.concentrator_time,
            frequency: self.frequency,
            channel_index: self.channel_index,
            data_rate_index: self.data_rate_index,
        }
    }
}

/// The gateway's answer to a time transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSyncReply {
    /// Concentrator time at which the gateway answered, tagged with the
    /// session it was issued for
    pub xtime: XTime,
    /// Server time at which the time transfer was sent
    pub sent_at: DateTime<Utc>,
    pub gps_time: Option<GpsTime>,
}

/// A decoded upstream message
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    Uplink(UplinkMessage),
    ClockSync(ClockSyncReply),
}

/// Uplink forwarded to the network server
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkEvent {
    pub gateway_id: String,
    pub session_id: SessionId,
    pub message: UplinkMessage,
}

impl UplinkEvent {
    pub fn token(&self) -> UplinkToken {
        self.message.token()
    }
}

/// A scheduled downlink ready to be encoded
#[derive(Debug, Clone, PartialEq)]
pub struct WireDownlink {
    /// Downlink id, unique within the connection
    pub diid: u64,
    pub device: DeviceIds,
    pub class: DeviceClass,
    pub payload: Bytes,
    pub window: Window,
    /// Receive delay in seconds for class A replies
    pub rx_delay: Option<u8>,
    pub xtime: XTime,
    pub frequency: u64,
    pub data_rate_index: u8,
    pub antenna: u8,
    pub priority: Priority,
}

impl WireDownlink {
    /// Describes a committed slot for the given request
    pub fn new(diid: u64, request: &DownlinkRequest, slot: &Slot, xtime: XTime) -> Self {
        let rx_delay = match request.mode {
            TransmissionMode::ClassA { uplink, .. } => {
                let secs = (slot.concentrator_time - uplink.concentrator_time) / 1_000_000;
                u8::try_from(secs).ok()
            }
            TransmissionMode::Scheduled { .. } => None,
        };
        WireDownlink {
            diid,
            device: request.device.clone(),
            class: request.device_class(),
            payload: request.payload.clone(),
            window: slot.window,
            rx_delay,
            xtime,
            frequency: slot.frequency,
            data_rate_index: slot.data_rate_index,
            antenna: slot.antenna,
            priority: slot.priority,
        }
    }
}

/// Translates between gateway data frames and server-side messages
pub trait Formatter: Send + Sync + 'static {
    /// Decodes an upstream data frame
    fn decode_uplink(&self, raw: &[u8], now: DateTime<Utc>, ctx: &SessionContext) -> Result<Upstream>;

    /// Encodes a downlink for transmission
    fn encode_downlink(&self, downlink: &WireDownlink, now: DateTime<Utc>, ctx: &SessionContext) -> Result<Bytes>;

    /// Builds a time transfer message
    ///
    /// Returns `None` when neither GPS nor concentrator time is known and
    /// there is nothing to transfer.
    fn compute_time_sync_reply(
        &self,
        now: DateTime<Utc>,
        gps: Option<GpsTime>,
        concentrator: Option<ConcentratorTime>,
        ctx: &SessionContext,
    ) -> Result<Option<Bytes>>;
}
