//! Shared data model for captured telemetry and forwarded input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel tag attached to every relayed dashboard log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Agent step output
    Agent,
    /// Tool/server status messages
    Status,
    /// Page console messages
    Console,
    /// Network request/response lines
    Network,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Agent => "agent",
            LogKind::Status => "status",
            LogKind::Console => "console",
            LogKind::Network => "network",
        }
    }
}

/// Console message severity as reported by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleKind {
    Log,
    Debug,
    Info,
    Warn,
    Error,
}

impl ConsoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleKind::Log => "log",
            ConsoleKind::Debug => "debug",
            ConsoleKind::Info => "info",
            ConsoleKind::Warn => "warn",
            ConsoleKind::Error => "error",
        }
    }
}

/// One captured console message or page error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    pub kind: ConsoleKind,
    pub text: String,
    /// Script location ("url:line") when the page reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConsoleLogEntry {
    pub fn new(kind: ConsoleKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            source: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// One captured network request.
///
/// Response fields start out empty and are filled in place when the matching
/// response arrives (matched by `request_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub request_headers: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub resource_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timestamp: Option<DateTime<Utc>>,
    /// Load failure reason, for requests that never completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl NetworkEvent {
    pub fn request(
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            url: url.into(),
            method: method.into(),
            request_headers: serde_json::Value::Null,
            request_body: None,
            resource_type: resource_type.into(),
            timestamp: Utc::now(),
            status: None,
            response_headers: None,
            body_size: None,
            response_timestamp: None,
            failure: None,
        }
    }

    /// Whether the response half has already been recorded.
    pub fn has_response(&self) -> bool {
        self.status.is_some()
    }

    /// Whether the request errored, either at the HTTP or the transport level.
    pub fn is_failed(&self) -> bool {
        self.status.is_some_and(|s| s >= 400) || self.failure.is_some()
    }
}

/// Modifier keys attached to a forwarded keyboard event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    /// CDP modifier bitmask: Alt=1, Ctrl=2, Meta=4, Shift=8.
    pub fn bitmask(&self) -> i64 {
        let mut mask = 0;
        if self.alt {
            mask |= 1;
        }
        if self.ctrl {
            mask |= 2;
        }
        if self.meta {
            mask |= 4;
        }
        if self.shift {
            mask |= 8;
        }
        mask
    }
}

/// Input intent forwarded from the dashboard viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Click {
        x: f64,
        y: f64,
    },
    Keydown {
        key: String,
        #[serde(default)]
        modifiers: Modifiers,
    },
    Keyup {
        key: String,
        #[serde(default)]
        modifiers: Modifiers,
    },
    Scroll {
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    },
}

impl InputEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InputEvent::Click { .. } => "click",
            InputEvent::Keydown { .. } => "keydown",
            InputEvent::Keyup { .. } => "keyup",
            InputEvent::Scroll { .. } => "scroll",
        }
    }
}

/// Dashboard-issued control action for a running agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Stop => "stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_bitmask() {
        assert_eq!(Modifiers::default().bitmask(), 0);
        let m = Modifiers {
            alt: true,
            ctrl: false,
            meta: false,
            shift: true,
        };
        assert_eq!(m.bitmask(), 9);
        let all = Modifiers {
            alt: true,
            ctrl: true,
            meta: true,
            shift: true,
        };
        assert_eq!(all.bitmask(), 15);
    }

    #[test]
    fn test_input_event_deserialize() {
        let ev: InputEvent = serde_json::from_str(r#"{"type":"click","x":100.5,"y":42.0}"#).unwrap();
        assert_eq!(ev, InputEvent::Click { x: 100.5, y: 42.0 });

        // Modifiers may be omitted entirely
        let ev: InputEvent = serde_json::from_str(r#"{"type":"keydown","key":"a"}"#).unwrap();
        match ev {
            InputEvent::Keydown { key, modifiers } => {
                assert_eq!(key, "a");
                assert_eq!(modifiers, Modifiers::default());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_input_event_serialize_tag() {
        let ev = InputEvent::Scroll {
            x: 1.0,
            y: 2.0,
            delta_x: 0.0,
            delta_y: -120.0,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"scroll"#));
        assert!(json.contains(r#""delta_y":-120"#));
    }

    #[test]
    fn test_network_event_response_state() {
        let mut ev = NetworkEvent::request("1", "GET", "http://localhost/api/items", "xhr");
        assert!(!ev.has_response());
        assert!(!ev.is_failed());
        ev.status = Some(500);
        assert!(ev.has_response());
        assert!(ev.is_failed());

        let mut aborted = NetworkEvent::request("2", "GET", "http://localhost/api/slow", "fetch");
        aborted.failure = Some("net::ERR_ABORTED".to_string());
        assert!(!aborted.has_response());
        assert!(aborted.is_failed());
    }

    #[test]
    fn test_control_action_serde() {
        let json = serde_json::to_string(&ControlAction::Pause).unwrap();
        assert_eq!(json, r#""pause""#);
        let action: ControlAction = serde_json::from_str(r#""stop""#).unwrap();
        assert_eq!(action, ControlAction::Stop);
    }
}
