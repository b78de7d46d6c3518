//! Dashboard relay server
//!
//! Owns the broadcast fan-out to dashboard clients and the single inbound
//! sink that routes user events back into the active browser session.

use axum::{
    routing::{get, get_service},
    Router,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{debug, error, info, warn};

use webeval_core::config::RelayConfig;
use webeval_core::LogKind;

use crate::handler::websocket_handler;
use crate::message::{InboundEvent, ServerMessage};
use crate::{RelayError, Result};

/// Shared relay state
pub struct RelayState {
    /// Broadcast channel for outbound dashboard messages, pre-serialized JSON
    pub broadcast_tx: broadcast::Sender<String>,
    /// Connected dashboard clients by connection id, with last-seen time
    pub connections: DashMap<String, DateTime<Utc>>,
    /// Consumer for inbound dashboard events, present while a session is attached
    sink: RwLock<Option<mpsc::UnboundedSender<InboundEvent>>>,
    /// Server task, present when this process owns the listener
    server: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the dashboard relay
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Relay {
    state: Arc<RelayState>,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay for the given configuration. The server does not
    /// listen until [`Relay::ensure_started`] is called.
    pub fn new(config: RelayConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);

        Self {
            state: Arc::new(RelayState {
                broadcast_tx,
                connections: DashMap::new(),
                sink: RwLock::new(None),
                server: Mutex::new(None),
            }),
            config,
        }
    }

    /// Start the relay server unless something is already listening.
    ///
    /// When the configured port already answers, an earlier instance is
    /// serving the dashboard and this call becomes a no-op.
    pub async fn ensure_started(&self) -> Result<()> {
        let mut server = self.state.server.lock().await;
        if server.is_some() {
            return Ok(());
        }

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| RelayError::Bind(format!("Invalid relay address: {}", e)))?;

        if port_in_use(addr).await {
            info!("Dashboard relay already listening on {}, reusing it", addr);
            return Ok(());
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Bind(format!("Failed to bind {}: {}", addr, e)))?;

        info!("Dashboard relay listening on {}", addr);
        info!("Dashboard endpoint: ws://{}/ws", addr);

        let app = build_router(self.clone(), self.config.static_dir.as_deref());
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Dashboard relay server error: {}", e);
            }
        });
        *server = Some(handle);

        Ok(())
    }

    /// Stop the relay server task if this process owns it.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.state.server.lock().await.take() {
            handle.abort();
            debug!("Dashboard relay server stopped");
        }
    }

    /// Broadcast a log line to all dashboard clients.
    pub fn log(&self, kind: LogKind, text: impl Into<String>) {
        let text = text.into();
        debug!("dashboard[{}]: {}", kind.as_str(), text);
        self.send(&ServerMessage::LogMessage { text, kind });
    }

    /// Broadcast a screencast frame as a data URL.
    pub fn frame(&self, data_url: String) {
        self.send(&ServerMessage::BrowserUpdate { data: data_url });
    }

    /// Broadcast the agent control state.
    pub fn agent_state(&self, paused: bool, stopped: bool) {
        self.send(&ServerMessage::AgentState { paused, stopped });
    }

    fn send(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            // A send error only means no client is connected right now
            Ok(json) => {
                let _ = self.state.broadcast_tx.send(json);
            }
            Err(e) => error!("Failed to serialize dashboard message: {}", e),
        }
    }

    /// Subscribe to the outbound broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.state.broadcast_tx.subscribe()
    }

    /// Register the consumer for inbound dashboard events, replacing any
    /// previous one.
    pub async fn register_sink(&self, tx: mpsc::UnboundedSender<InboundEvent>) {
        *self.state.sink.write().await = Some(tx);
    }

    /// Drop the inbound consumer. Later events are discarded with a report.
    pub async fn unregister_sink(&self) {
        *self.state.sink.write().await = None;
    }

    /// Route an inbound dashboard event to the registered consumer.
    ///
    /// Events arriving while no consumer is registered are dropped and
    /// reported, never queued for later.
    pub async fn dispatch_inbound(&self, event: InboundEvent) {
        let kind = match &event {
            InboundEvent::Input(e) => e.kind(),
            InboundEvent::Control(a) => a.as_str(),
        };

        let mut stale = false;
        {
            let sink = self.state.sink.read().await;
            if let Some(tx) = sink.as_ref() {
                if tx.send(event).is_ok() {
                    return;
                }
                // Receiver is gone, the session ended without unregistering
                stale = true;
            }
        }
        if stale {
            self.unregister_sink().await;
        }

        warn!("Dropping dashboard {} event: no active session", kind);
        self.log(
            LogKind::Status,
            format!("Ignored {} event: no active browser session", kind),
        );
    }

    /// Record a new dashboard connection.
    pub fn connection_opened(&self, id: &str) {
        self.state.connections.insert(id.to_string(), Utc::now());
    }

    /// Refresh the last-seen time for a connection.
    pub fn touch_connection(&self, id: &str) {
        if let Some(mut entry) = self.state.connections.get_mut(id) {
            *entry = Utc::now();
        }
    }

    /// Forget a closed dashboard connection.
    pub fn connection_closed(&self, id: &str) {
        self.state.connections.remove(id);
    }

    /// Number of currently connected dashboard clients.
    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// Address the relay serves on.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// Probe whether something already accepts connections on the address.
async fn port_in_use(addr: SocketAddr) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_millis(250), TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Build the axum router for the relay endpoints.
fn build_router(relay: Relay, static_dir: Option<&str>) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(|| async { "OK" }));

    if let Some(dir) = static_dir {
        info!("Serving dashboard assets from: {}", dir);
        let serve_dir = get_service(ServeDir::new(dir)).handle_error(|e| async move {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            )
        });
        router = router.fallback_service(serve_dir);
    }

    router.layer(cors_layer).with_state(relay)
}
