//! webeval-relay: dashboard relay for webeval
//!
//! Serves the live-view dashboard over WebSocket. Outbound traffic fans out
//! log lines, screencast frames and agent state to every connected client;
//! inbound traffic carries user input and agent control back to the single
//! active browser session.

pub mod error;
pub mod handler;
pub mod message;
pub mod server;

pub use error::{RelayError, Result};
pub use handler::websocket_handler;
pub use message::{ClientMessage, InboundEvent, ServerMessage};
pub use server::{Relay, RelayState};
