//! Transmit sink error types

use std::time::Duration;
use thiserror::Error;

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors surfaced by the transmit sink lifecycle.
///
/// Underruns and deferred pushes are not errors; they only show up in
/// [`TxStats`](crate::sink::TxStats).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Invalid ring or slot configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No transfer engine bound to the sink
    #[error("No device bound to the transmit sink")]
    NoDevice,

    /// The transfer engine refused to start streaming
    #[error("Failed to start TX streaming: {0}")]
    HardwareStart(String),

    /// The transfer engine refused to stop; the sink is still torn down
    #[error("Failed to stop TX streaming: {0}")]
    HardwareStop(String),

    /// The engine stopped pulling transfers on its own while the sink was
    /// waiting for room
    #[error("TX engine stopped streaming")]
    EngineStopped,

    /// The stop sequence did not finish before the configured deadline
    #[error("TX stop timed out after {}ms", .0.as_millis())]
    StopTimeout(Duration),
}
