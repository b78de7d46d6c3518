//! webeval-browser: the single live browser session
//!
//! Owns browser launch and teardown, page creation with telemetry attached
//! up front, the dashboard screencast, input forwarded from the dashboard,
//! and the cookie/localStorage state persisted between runs.

pub mod error;
pub mod input;
pub mod screencast;
pub mod session;
pub mod state;
pub mod telemetry;

pub use error::{BrowserError, Result};
pub use input::InputRelay;
pub use screencast::Screencast;
pub use session::{SessionManager, SessionShared};
pub use state::PersistedState;
pub use telemetry::{TelemetryBuffers, TelemetryHandle};
