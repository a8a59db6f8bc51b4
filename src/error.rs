//! Error types for bsevent-bridge

use thiserror::Error;

/// Errors that can occur while running the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Connection establishment failure (refused, timed out, bad handshake)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Socket-level failure on an established connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer violated the expected framing or protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event queue is unusable (poisoned lock)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Session bookkeeping is unusable (poisoned lock)
    #[error("Session error: {0}")]
    Session(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether this error originated in the socket layer
    ///
    /// Transport faults and everything else are logged under distinct tags
    /// by the supervisor.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BridgeError::Connection(_) | BridgeError::Transport(_) | BridgeError::Protocol(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Protocol(e) => BridgeError::Protocol(e.to_string()),
            WsError::Capacity(e) => BridgeError::Protocol(e.to_string()),
            other => BridgeError::Transport(other.to_string()),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
