//! WebSocket connection handler
//!
//! Bridges one dashboard client to the relay: outbound broadcast messages
//! are forwarded to the socket, inbound messages are decoded and routed to
//! the registered session sink.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::message::{ClientMessage, InboundEvent};
use crate::server::Relay;
use crate::Result;

/// Handle WebSocket upgrade request
pub async fn websocket_handler(ws: WebSocketUpgrade, State(relay): State<Relay>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

/// Handle established WebSocket connection
async fn handle_socket(socket: WebSocket, relay: Relay) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!("New dashboard connection: {}", conn_id);
    relay.connection_opened(&conn_id);

    // Split socket into sender and receiver
    let (ws_tx, mut ws_rx) = socket.split();
    let ws_tx = Arc::new(tokio::sync::Mutex::new(ws_tx));

    let mut broadcast_rx = relay.subscribe();

    // Clone for tasks
    let conn_id_send = conn_id.clone();
    let conn_id_recv = conn_id.clone();
    let ws_tx_send = ws_tx.clone();
    let ws_tx_recv = ws_tx.clone();

    // Task to forward broadcast messages to this client
    let send_task = async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(msg) => {
                    let mut tx = ws_tx_send.lock().await;
                    if tx.send(WsMessage::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Slow consumer, screencast frames dominate the stream
                    warn!(
                        "Dashboard connection {} lagged, {} messages skipped",
                        conn_id_send, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Send task ended for connection: {}", conn_id_send);
    };

    // Task to receive messages from the client
    let relay_recv = relay.clone();
    let recv_task = async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    if let Err(e) = handle_client_message(&text, &relay_recv, &conn_id_recv).await
                    {
                        error!("Error handling dashboard message: {}", e);
                    }
                }
                Ok(WsMessage::Ping(data)) => {
                    debug!("Received ping from connection: {}", conn_id_recv);
                    let mut tx = ws_tx_recv.lock().await;
                    let _ = tx.send(WsMessage::Pong(data)).await;
                }
                Ok(WsMessage::Close(_)) => {
                    info!("Dashboard closed connection: {}", conn_id_recv);
                    break;
                }
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        debug!("Receive task ended for connection: {}", conn_id_recv);
    };

    // Run both tasks
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    relay.connection_closed(&conn_id);
    info!("Dashboard connection closed: {}", conn_id);
}

/// Handle incoming dashboard message
async fn handle_client_message(text: &str, relay: &Relay, conn_id: &str) -> Result<()> {
    let msg: ClientMessage = serde_json::from_str(text)?;

    match msg {
        ClientMessage::BrowserInput { event } => {
            relay.dispatch_inbound(InboundEvent::Input(event)).await;
        }
        ClientMessage::AgentControl { action } => {
            relay.dispatch_inbound(InboundEvent::Control(action)).await;
        }
        ClientMessage::Heartbeat => {
            relay.touch_connection(conn_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use webeval_core::InputEvent;

    #[test]
    fn test_client_message_deserialization() {
        let json = r#"{"type":"browser_input","event":{"type":"keydown","key":"Enter"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::BrowserInput { event } => match event {
                InputEvent::Keydown { key, modifiers } => {
                    assert_eq!(key, "Enter");
                    assert_eq!(modifiers.bitmask(), 0);
                }
                _ => panic!("Wrong input event"),
            },
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_malformed_message_is_error() {
        let json = r#"{"type":"browser_input"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }
}
