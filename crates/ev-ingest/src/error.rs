//! Ingestion layer error types

use thiserror::Error;

/// Acquisition and pipeline errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake not acknowledged within {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    #[error("Handshake rejected: {message}")]
    HandshakeRejected { message: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Poll request failed: {0}")]
    Poll(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Storage error: {0}")]
    Storage(#[from] ev_persistence::StorageError),

    #[error("Session derivation error: {0}")]
    Session(#[from] ev_sessions::SessionError),

    #[error("Analytics error: {0}")]
    Analytics(#[from] ev_analytics::AnalyticsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for IngestError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Poll(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
