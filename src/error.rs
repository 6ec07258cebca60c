use std::time::Duration;

use thiserror::Error;

/// Errors from the device transport and connection lifecycle.
///
/// The `Display` text is what the consumer sees in an error event, so keep
/// it readable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("GC2 device not found")]
    DeviceNotFound,

    #[error("permission denied opening device: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by device")]
    Disconnected,

    #[error("device query failed: {0}")]
    Query(String),
}

/// Errors from the relay (GSPro Open Connect) client.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no response after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("connection closed by relay")]
    Disconnected,
}

/// Errors from the event dispatcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The dispatcher was shut down; the action was dropped without running.
    #[error("dispatcher is shut down")]
    Closed,

    /// A consumer-only operation was called from a producer thread.
    #[error("called from a thread other than the consumer thread")]
    NotConsumerThread,
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;
