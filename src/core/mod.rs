//! Core types shared by the gateway server core
//!
//! This module contains the error type, identifiers, priorities and the
//! configuration structures used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    BridgeConfig,
    ClockConfig,
    DeviceIds,
    Eui64,
    GatewayIdentity,
    Priority,
    SchedulerConfig,
    ServerConfig,
    SessionId,
};

/// Maximum frame size accepted from a gateway transport
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Size of the LoRaWAN MAC header plus message integrity code
pub const PHY_PAYLOAD_OVERHEAD: usize = 5;
