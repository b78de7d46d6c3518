//! Error types for webeval-browser

use thiserror::Error;

/// Error strings that mean the page or browser went away mid-command.
/// Matched case-insensitively against the rendered CDP error.
const DEAD_SESSION_MARKERS: &[&str] = &[
    "target closed",
    "session closed",
    "connection closed",
    "browser closed",
    "receiver is gone",
    "oneshot canceled",
];

/// Browser engine error type
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("CDP error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("No active browser session")]
    NoSession,

    #[error("Browser state error: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BrowserError {
    /// Whether the error means the target, session, or transport is gone,
    /// as opposed to a command failing on a live session.
    pub fn is_session_closed(&self) -> bool {
        match self {
            BrowserError::Cdp(e) => cdp_session_closed(e),
            _ => false,
        }
    }
}

/// Classify a CDP error as a dead session.
///
/// The command channel going away always counts; everything else is decided
/// by the error text, mirroring how the browser reports detached targets.
pub fn cdp_session_closed(e: &chromiumoxide::error::CdpError) -> bool {
    if matches!(e, chromiumoxide::error::CdpError::ChannelSendError(_)) {
        return true;
    }
    let text = e.to_string().to_lowercase();
    DEAD_SESSION_MARKERS.iter().any(|m| text.contains(m))
}

/// Result type alias for webeval-browser
pub type Result<T> = std::result::Result<T, BrowserError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chromiumoxide::error::CdpError;

    #[test]
    fn test_dead_session_by_text() {
        let e = CdpError::from(std::io::Error::other("Target closed"));
        assert!(cdp_session_closed(&e));

        let e = CdpError::from(std::io::Error::other("Session closed: tab went away"));
        assert!(cdp_session_closed(&e));

        let e = CdpError::from(std::io::Error::other("connection closed by remote"));
        assert!(cdp_session_closed(&e));
    }

    #[test]
    fn test_live_session_errors_not_classified() {
        let e = CdpError::from(std::io::Error::other("net::ERR_CONNECTION_REFUSED"));
        assert!(!cdp_session_closed(&e));

        let e = CdpError::from(std::io::Error::other("Invalid parameters"));
        assert!(!cdp_session_closed(&e));
    }

    #[test]
    fn test_browser_error_classification() {
        let e = BrowserError::Cdp(CdpError::from(std::io::Error::other("Target closed")));
        assert!(e.is_session_closed());

        assert!(!BrowserError::NoSession.is_session_closed());
        assert!(!BrowserError::Navigation("timeout".to_string()).is_session_closed());
    }
}
