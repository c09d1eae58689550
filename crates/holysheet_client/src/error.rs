//! Error taxonomy for the client core. Nothing here is fatal to the process:
//! transport failures end up as a status, the rest are reported and skipped.

use thiserror::Error;

/// Connection-level failure. Always recoverable through reconnect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to open {endpoint}: {reason}")]
    Open { endpoint: String, reason: String },
    #[error("connection error: {0}")]
    Io(String),
    #[error("send failed: {0}")]
    Send(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Client error, one variant per class of failure the core can observe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Malformed or unrecognized envelope. Dispatch is skipped.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// User input rejected locally, before any network activity.
    #[error("{0}")]
    Validation(String),
    /// `error` envelope sent by the server.
    #[error("server error: {0}")]
    Remote(String),
    #[error("dataset load failed: {0}")]
    Dataset(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}
