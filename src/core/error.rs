use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Custom error types for the gateway server core
///
/// The enum is `Clone` so that a single disconnect reason can be handed to
/// every party waiting on a connection; I/O errors are shared behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Too many protocol errors: {0}")]
    TooManyProtocolErrors(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Band `{region}` not found for version `{version}`")]
    BandNotFound { region: String, version: String },

    #[error("Data rate offset {offset} out of range (max {max})")]
    OffsetOutOfRange { offset: u8, max: u8 },

    #[error("Data rate index {index} out of range (max {max})")]
    DataRateOutOfRange { index: u8, max: u8 },

    #[error("Invalid channel mask: {0}")]
    InvalidChannelMask(String),

    #[error("Band `{0}` needs a channel plan offset to compute the beacon frequency")]
    ChannelPlanOffsetRequired(String),

    #[error("Unknown channel for frequency {frequency} Hz")]
    UnknownChannel { frequency: u64 },

    #[error("Clock not synchronized")]
    ClockNotSynchronized,

    #[error("Concentrator time {0} us out of range")]
    ConcentratorTimeOutOfRange(i64),

    #[error("Time out of range: {0}")]
    TimeOutOfRange(String),

    #[error("Duty cycle exceeded in sub-band {min_frequency}-{max_frequency} Hz")]
    DutyCycleExceeded { min_frequency: u64, max_frequency: u64 },

    #[error("Slot conflict on antenna {antenna}")]
    SlotConflict { antenna: u8 },

    #[error("Too late to transmit: window started {late_by_ms} ms before the schedule lead")]
    TooLate { late_by_ms: u64 },

    #[error("Payload of {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("No sub-band covers frequency {frequency} Hz")]
    NoSubBand { frequency: u64 },

    #[error("Authentication required for gateway `{0}`")]
    AuthenticationRequired(String),

    #[error("Gateway `{0}` is already connected")]
    AlreadyConnected(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Liveness timeout")]
    LivenessTimeout,

    #[error("Connection closed by peer")]
    ClosedByPeer,

    #[error("Outbound queue full")]
    Backpressure,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Event loop panicked: {0}")]
    EventLoopPanic(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new malformed message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedMessage(msg.into())
    }

    /// Creates a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new band-not-found error
    pub fn band_not_found(region: impl Into<String>, version: impl std::fmt::Display) -> Self {
        Error::BandNotFound {
            region: region.into(),
            version: version.to_string(),
        }
    }

    /// Returns whether this error is a scheduling rejection reported to the
    /// downlink originator
    pub fn is_scheduling_rejection(&self) -> bool {
        matches!(
            self,
            Error::DutyCycleExceeded { .. }
                | Error::SlotConflict { .. }
                | Error::OffsetOutOfRange { .. }
                | Error::DataRateOutOfRange { .. }
                | Error::TooLate { .. }
                | Error::PayloadTooLarge { .. }
                | Error::NoSubBand { .. }
                | Error::UnknownChannel { .. }
        )
    }

    /// Returns whether this error terminates the connection it occurred on
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Transport(_)
                | Error::LivenessTimeout
                | Error::ClosedByPeer
                | Error::TooManyProtocolErrors(_)
                | Error::RateLimited(_)
                | Error::EventLoopPanic(_)
                | Error::ConnectionClosed
        )
    }
}
