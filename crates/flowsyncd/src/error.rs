//! Error types for flowsyncd.

use thiserror::Error;

/// Result type alias for flowsyncd operations.
pub type Result<T> = std::result::Result<T, FlowsyncError>;

/// Errors that can occur in flowsyncd.
///
/// The control core itself is level-triggered and never propagates errors
/// past one `run`/`put` cycle; these surface from setup, configuration,
/// and transport plumbing.
#[derive(Debug, Error)]
pub enum FlowsyncError {
    /// Socket-level failure on the switch connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An OpenFlow message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Proto(#[from] vnet_ofproto::ProtoError),

    /// Attempted to send while the switch connection is down.
    #[error("not connected to switch")]
    NotConnected,

    /// The connection target string is not something we can dial.
    #[error("unsupported connection target '{0}'")]
    BadTarget(String),

    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Metrics registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl FlowsyncError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
