//! Error types for webeval-agent

use thiserror::Error;

/// Agent error type
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("CDP error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("Agent step error: {0}")]
    Step(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for webeval-agent
pub type Result<T> = std::result::Result<T, AgentError>;
