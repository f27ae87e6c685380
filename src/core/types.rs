use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifies one physical gateway session against clock rollovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u8);

impl SessionId {
    /// Returns the session following this one, wrapping at the 8-bit boundary
    pub fn next(&self) -> Self {
        SessionId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// 64-bit extended unique identifier of a gateway or end device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Eui64(pub [u8; 8]);

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{}", parts.join("-"))
    }
}

/// Identity a gateway presents when it connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayIdentity {
    /// Unique gateway identifier
    pub gateway_id: String,
    /// Gateway EUI, if known
    pub eui: Option<Eui64>,
    /// Region id of the gateway's frequency plan, e.g. `EU_863_870`
    pub band_id: String,
    /// Regional parameters version; the latest supported one when absent
    pub phy_version: Option<crate::band::PhyVersion>,
    /// Bearer token presented by the gateway
    pub auth_token: Option<String>,
}

impl GatewayIdentity {
    /// Creates an identity for a gateway on the given band
    pub fn new(gateway_id: impl Into<String>, band_id: impl Into<String>) -> Self {
        GatewayIdentity {
            gateway_id: gateway_id.into(),
            eui: None,
            band_id: band_id.into(),
            phy_version: None,
            auth_token: None,
        }
    }

    /// Attaches a bearer token
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Identifiers of the end device a downlink targets
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceIds {
    /// Application-scoped device identifier
    pub device_id: String,
    /// Device EUI, if known
    pub dev_eui: Option<Eui64>,
}

impl DeviceIds {
    /// Creates device identifiers from a device id
    pub fn new(device_id: impl Into<String>) -> Self {
        DeviceIds {
            device_id: device_id.into(),
            dev_eui: None,
        }
    }
}

/// Downlink transmission priority; the highest wins ties
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Lowest,
    Low,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    Highest,
}

/// Configuration of the downlink scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Trailing window over which duty-cycle usage is accumulated
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub duty_cycle_window: Duration,
    /// Minimum time between a scheduling decision and the transmission
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub schedule_lead: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            duty_cycle_window: Duration::from_secs(3600),
            schedule_lead: Duration::from_millis(100),
        }
    }
}

/// Configuration of the concentrator clock model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Round trips slower than this are not used for synchronization
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub max_round_trip: Duration,
    /// Corrections larger than this re-anchor the epoch instead of filtering
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub max_correction: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            max_round_trip: Duration::from_millis(500),
            max_correction: Duration::from_secs(2),
        }
    }
}

/// Configuration of the per-gateway protocol bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interval between keepalive pings
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub ping_interval: Duration,
    /// Time a ping may stay unanswered before the gateway is considered gone
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub liveness_timeout: Duration,
    /// Interval between time transfers; zero disables them
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub time_sync_interval: Duration,
    /// Relative jitter applied to the ping and time sync intervals
    pub jitter: f64,
    /// Capacity of the outbound downlink buffer
    pub outbound_capacity: usize,
    /// Capacity of the downlink request queue
    pub request_capacity: usize,
    /// Capacity of the uplink queue towards the network server
    pub uplink_capacity: usize,
    /// Malformed messages tolerated before the session is terminated
    pub max_protocol_errors: u32,
    /// Time the writer may spend sending the close frame on teardown
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub close_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            ping_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(60),
            time_sync_interval: Duration::from_secs(200),
            jitter: 0.1,
            outbound_capacity: 16,
            request_capacity: 16,
            uplink_capacity: 64,
            max_protocol_errors: 10,
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration of the gateway server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Accept gateways that present no token (local testing only)
    pub allow_unauthenticated: bool,
    /// Protocol bridge settings
    pub bridge: BridgeConfig,
    /// Downlink scheduler settings
    pub scheduler: SchedulerConfig,
    /// Clock model settings
    pub clock: ClockConfig,
}
