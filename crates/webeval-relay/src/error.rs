//! Error types for webeval-relay

use thiserror::Error;

/// Relay error type
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for webeval-relay
pub type Result<T> = std::result::Result<T, RelayError>;
