//! Error types for devlink.

use thiserror::Error;

/// Main error type for all devlink operations.
#[derive(Debug, Error)]
pub enum DevlinkError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol or handshake error.
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    /// The dial URL could not be constructed.
    #[error("invalid dial URL: {0}")]
    InvalidUrl(String),

    /// Authorization value could not be obtained or attached.
    #[error("authorization error: {0}")]
    Auth(String),

    /// A call was issued with no live transport.
    #[error("not connected")]
    NotConnected,

    /// The connection went away while a call was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The client has been closed; no further operations may succeed.
    #[error("client closed")]
    Closed,

    /// `call` was invoked with an empty method name.
    #[error("method required")]
    MethodRequired,

    /// The call deadline elapsed before a response arrived.
    #[error("deadline exceeded")]
    Deadline,
}

/// Result type alias using DevlinkError.
pub type Result<T> = std::result::Result<T, DevlinkError>;
