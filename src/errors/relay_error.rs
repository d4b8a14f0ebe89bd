use thiserror::Error;

use crate::core::connection::TransportError;

/// Errors raised by the relay core.
///
/// None of these terminate the process: the orchestrator reports them and
/// keeps serving the remaining legs.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Opening the model leg failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket protocol error on an established leg
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid relay configuration (endpoint URL, headers)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Peer transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The orchestrator event loop is no longer running
    #[error("Relay event loop is not running")]
    ChannelClosed,
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
