use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClockSyncReply, Formatter, SessionContext, UplinkMessage, Upstream, WireDownlink};
use crate::core::{Error, Result};
use crate::time::{util, ConcentratorTime, GpsTime, XTime};

/// LNS-style JSON messages, discriminated by `msgtype`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msgtype")]
enum Message {
    #[serde(rename = "updf")]
    Uplink(UplinkFrame),
    #[serde(rename = "timesync")]
    TimeSync(TimeSync),
    #[serde(rename = "dnmsg")]
    Downlink(DownlinkMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UplinkFrame {
    #[serde(serialize_with = "crate::core::serde::serialize_hex")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_hex")]
    pdu: Bytes,
    #[serde(rename = "DR")]
    data_rate: u8,
    #[serde(rename = "Freq")]
    frequency: u64,
    #[serde(rename = "upinfo")]
    info: UplinkInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UplinkInfo {
    #[serde(default)]
    rctx: u8,
    xtime: XTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gpstime: Option<i64>,
    #[serde(default)]
    rssi: f32,
    #[serde(default)]
    snr: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TimeSync {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    txtime: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    xtime: Option<XTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gpstime: Option<i64>,
    #[serde(rename = "MuxTime", default, skip_serializing_if = "Option::is_none")]
    mux_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DownlinkMessage {
    #[serde(rename = "DevEui", default, skip_serializing_if = "Option::is_none")]
    dev_eui: Option<String>,
    #[serde(rename = "dC")]
    device_class: u8,
    diid: u64,
    #[serde(serialize_with = "crate::core::serde::serialize_hex")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_hex")]
    pdu: Bytes,
    #[serde(rename = "RxDelay", default, skip_serializing_if = "Option::is_none")]
    rx_delay: Option<u8>,
    #[serde(rename = "DR")]
    data_rate: u8,
    #[serde(rename = "Freq")]
    frequency: u64,
    rctx: u8,
    priority: u8,
    xtime: XTime,
    #[serde(rename = "MuxTime")]
    mux_time: f64,
}

/// JSON formatter for LNS-style gateways
///
/// Uplinks arrive as `updf`, time transfers go out as `timesync` and come back
/// as `timesync` echoing the transfer time in `txtime`, downlinks go out as
/// `dnmsg`. Payloads are hex encoded; `MuxTime` is the server time in
/// fractional Unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        JsonFormatter
    }

    fn to_bytes(message: &Message) -> Result<Bytes> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| Error::encoding(format!("failed to encode JSON message: {}", e)))
    }
}

impl Formatter for JsonFormatter {
    fn decode_uplink(&self, raw: &[u8], now: DateTime<Utc>, ctx: &SessionContext) -> Result<Upstream> {
        let message: Message = serde_json::from_slice(raw)
            .map_err(|e| Error::malformed(format!("invalid JSON message: {}", e)))?;

        match message {
            Message::Uplink(frame) => {
                ctx.band.data_rate(frame.data_rate).map_err(|e| {
                    Error::malformed(format!("uplink data rate not valid in {}: {}", ctx.band_id, e))
                })?;
                Ok(Upstream::Uplink(UplinkMessage {
                    channel_index: ctx.band.uplink_channel_index(frame.frequency),
                    payload: frame.pdu,
                    frequency: frame.frequency,
                    data_rate_index: frame.data_rate,
                    antenna: frame.info.rctx,
                    concentrator_time: frame.info.xtime.concentrator_time(),
                    gps_time: frame.info.gpstime.map(GpsTime::from_micros),
                    rssi: frame.info.rssi,
                    snr: frame.info.snr,
                    received_at: now,
                }))
            }
            Message::TimeSync(sync) => {
                let (Some(xtime), Some(txtime)) = (sync.xtime, sync.txtime) else {
                    return Err(Error::malformed("timesync reply without xtime and txtime"));
                };
                Ok(Upstream::ClockSync(ClockSyncReply {
                    xtime,
                    sent_at: util::from_unix_seconds(txtime)?,
                    gps_time: sync.gpstime.map(GpsTime::from_micros),
                }))
            }
            Message::Downlink(_) => Err(Error::malformed("unexpected dnmsg from gateway")),
        }
    }

    fn encode_downlink(&self, downlink: &WireDownlink, now: DateTime<Utc>, _ctx: &SessionContext) -> Result<Bytes> {
        let message = Message::Downlink(DownlinkMessage {
            dev_eui: downlink.device.dev_eui.map(|eui| eui.to_string()),
            device_class: downlink.class.as_u8(),
            diid: downlink.diid,
            pdu: downlink.payload.clone(),
            rx_delay: downlink.rx_delay,
            data_rate: downlink.data_rate_index,
            frequency: downlink.frequency,
            rctx: downlink.antenna,
            priority: downlink.priority as u8,
            xtime: downlink.xtime,
            mux_time: util::to_unix_seconds(now),
        });
        Self::to_bytes(&message)
    }

    fn compute_time_sync_reply(
        &self,
        now: DateTime<Utc>,
        gps: Option<GpsTime>,
        concentrator: Option<ConcentratorTime>,
        ctx: &SessionContext,
    ) -> Result<Option<Bytes>> {
        if gps.is_none() && concentrator.is_none() {
            return Ok(None);
        }
        let xtime = concentrator
            .map(|ct| XTime::encode(ctx.session_id, ct))
            .transpose()?;
        let message = Message::TimeSync(TimeSync {
            txtime: None,
            xtime,
            gpstime: gps.map(|gps| gps.as_micros()),
            mux_time: Some(util::to_unix_seconds(now)),
        });
        Self::to_bytes(&message).map(Some)
    }
}
