//! Core types and configuration for webeval
//!
//! This crate provides the configuration system and the shared data model
//! used by every other webeval crate: console and network telemetry entries,
//! dashboard input events, and agent control actions.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AgentKind, Config, FilterMode, FrameFormat, ScreencastMode,
};
pub use error::{Error, Result};
pub use types::{
    ConsoleKind, ConsoleLogEntry, ControlAction, InputEvent, LogKind, Modifiers, NetworkEvent,
};
