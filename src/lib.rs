//! LoRaWAN gateway server radio core
//!
//! This library holds the parts of a LoRaWAN gateway server that face the
//! radio: regional band tables, the mapping between a gateway's concentrator
//! clock and server time, and the per-gateway connection that schedules
//! downlinks into receive windows while respecting duty cycle limits.
//!
//! - [`band`]: frequency plans per region and regional parameters revision
//! - [`time`]: concentrator clock model, XTime and GPS time
//! - [`scheduling`]: time on air, duty cycle and the downlink scheduler
//! - [`protocol`]: wire framing and the formatter seam
//! - [`network`]: gateway admission, connection handles and the protocol bridge
//!
//! # Examples
//!
//! ```no_run
//! use lorawan_gs::core::{GatewayIdentity, ServerConfig};
//! use lorawan_gs::network::{GatewayServer, ProtocolBridge};
//! use lorawan_gs::protocol::JsonFormatter;
//!
//! # async fn serve(stream: tokio::net::TcpStream) -> lorawan_gs::Result<()> {
//! let bridge = ProtocolBridge::new(GatewayServer::new(ServerConfig::default()), JsonFormatter);
//! let identity = GatewayIdentity::new("eui-0011223344556677", "EU_863_870").with_auth("token");
//! let connection = bridge.accept(stream, identity)?;
//! connection.closed().await;
//! # Ok(())
//! # }
//! ```

pub mod band;
pub mod core;
pub mod network;
pub mod protocol;
pub mod scheduling;
pub mod time;
mod util;

// Re-export commonly used items
pub use crate::band::{Band, BandRegistry, PhyVersion};
pub use crate::core::{Error, Result};
pub use crate::network::{Connection, GatewayServer, ProtocolBridge};
pub use crate::scheduling::{DownlinkRequest, Scheduler, Slot};
pub use crate::time::{ClockModel, XTime};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
