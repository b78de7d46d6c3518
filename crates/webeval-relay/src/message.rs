//! Dashboard wire message types
//!
//! Defines the JSON message format spoken over the dashboard WebSocket.

use serde::{Deserialize, Serialize};

use webeval_core::{ControlAction, InputEvent, LogKind};

/// Message from the relay to dashboard clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Log line for the dashboard console pane
    LogMessage { text: String, kind: LogKind },

    /// Fresh screencast frame, base64 data URL
    BrowserUpdate { data: String },

    /// Agent runner control state
    AgentState { paused: bool, stopped: bool },
}

/// Message from dashboard clients to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// User interaction with the mirrored page
    BrowserInput { event: InputEvent },

    /// Pause/resume/stop the agent runner
    AgentControl { action: ControlAction },

    /// Keepalive
    Heartbeat,
}

/// Decoded dashboard event handed to the registered consumer
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Input destined for the live page
    Input(InputEvent),
    /// Agent control request
    Control(ControlAction),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_log_message() {
        let msg = ServerMessage::LogMessage {
            text: "Step 1".to_string(),
            kind: LogKind::Agent,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"log_message"#));
        assert!(json.contains(r#""text":"Step 1"#));
        assert!(json.contains(r#""kind":"agent"#));
    }

    #[test]
    fn test_serialize_browser_update() {
        let msg = ServerMessage::BrowserUpdate {
            data: "data:image/jpeg;base64,AAAA".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"browser_update"#));
        assert!(json.contains("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_serialize_agent_state() {
        let msg = ServerMessage::AgentState {
            paused: true,
            stopped: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"agent_state"#));
        assert!(json.contains(r#""paused":true"#));
        assert!(json.contains(r#""stopped":false"#));
    }

    #[test]
    fn test_deserialize_browser_input() {
        let json = r#"{"type":"browser_input","event":{"type":"click","x":120.5,"y":44.0}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::BrowserInput { event } => match event {
                InputEvent::Click { x, y } => {
                    assert_eq!(x, 120.5);
                    assert_eq!(y, 44.0);
                }
                _ => panic!("Wrong input event"),
            },
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_deserialize_agent_control() {
        let json = r#"{"type":"agent_control","action":"pause"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::AgentControl { action } => {
                assert_eq!(action, ControlAction::Pause);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_deserialize_heartbeat() {
        let json = r#"{"type":"heartbeat"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Heartbeat));
    }
}
