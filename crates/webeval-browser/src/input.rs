//! Dashboard input forwarded to the live page
//!
//! Events only reach CDP while a page is open and its screencast is
//! running; anything else is reported to the dashboard and dropped. A
//! dispatch error that means the session died clears both preconditions so
//! later events fail fast instead of retrying a dead target.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::Page;
use std::sync::Arc;
use tracing::{debug, warn};

use webeval_core::{InputEvent, LogKind, Modifiers};
use webeval_relay::Relay;

use crate::error::{BrowserError, Result};
use crate::session::SessionShared;

/// Pause between mouse press and release so the page registers a click.
const CLICK_HOLD: Duration = Duration::from_millis(50);

/// Routes dashboard input events onto the active page.
#[derive(Clone)]
pub struct InputRelay {
    shared: Arc<SessionShared>,
    relay: Relay,
}

impl InputRelay {
    pub fn new(shared: Arc<SessionShared>, relay: Relay) -> Self {
        Self { shared, relay }
    }

    /// Dispatch one event. Never fails the caller; every problem is
    /// reported to the dashboard instead.
    pub async fn dispatch(&self, event: InputEvent) {
        let Some(page) = self.shared.page() else {
            warn!("Dropping {} input: no active page", event.kind());
            self.relay
                .log(LogKind::Status, "Input error: no active browser session");
            return;
        };
        if !self.shared.screencast_running() {
            warn!("Dropping {} input: screencast not running", event.kind());
            self.relay
                .log(LogKind::Status, "Input error: screencast not running");
            return;
        }

        let kind = event.kind();
        if let Err(e) = self.send(&page, event).await {
            warn!("Failed to dispatch {} input: {}", kind, e);
            self.relay
                .log(LogKind::Status, format!("Input error: {}", e));
            if e.is_session_closed() {
                self.relay.log(
                    LogKind::Status,
                    "Browser session closed, input handling stopped",
                );
                self.shared.set_screencast_running(false);
                self.shared.clear_page();
            }
        }
    }

    async fn send(&self, page: &Page, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::Click { x, y } => self.click(page, x, y).await,
            InputEvent::Keydown { key, modifiers } => {
                self.key(page, DispatchKeyEventType::KeyDown, &key, modifiers)
                    .await
            }
            InputEvent::Keyup { key, modifiers } => {
                self.key(page, DispatchKeyEventType::KeyUp, &key, modifiers)
                    .await
            }
            InputEvent::Scroll {
                x,
                y,
                delta_x,
                delta_y,
            } => self.scroll(page, x, y, delta_x, delta_y).await,
        }
    }

    /// A click is a press/release pair at the same coordinates.
    async fn click(&self, page: &Page, x: f64, y: f64) -> Result<()> {
        let pressed = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(BrowserError::Other)?;
        page.execute(pressed).await?;

        tokio::time::sleep(CLICK_HOLD).await;

        let released = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(BrowserError::Other)?;
        page.execute(released).await?;

        debug!("Dispatched click at ({}, {})", x, y);
        self.relay
            .log(LogKind::Status, format!("Click sent at ({}, {})", x, y));
        Ok(())
    }

    async fn key(
        &self,
        page: &Page,
        kind: DispatchKeyEventType,
        key: &str,
        modifiers: Modifiers,
    ) -> Result<()> {
        let down = kind == DispatchKeyEventType::KeyDown;

        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key.to_string())
            .modifiers(modifiers.bitmask());
        // Printable characters carry text so inputs actually receive them
        if down && printable_char(key) {
            builder = builder.text(key.to_string());
        }
        let mut params = builder.build().map_err(BrowserError::Other)?;
        if down && key == "Backspace" {
            params.commands = Some(vec!["deleteBackward".to_string()]);
        }

        page.execute(params).await?;

        let label = if down { "Key down" } else { "Key up" };
        debug!("Dispatched {} for {:?}", label, key);
        self.relay
            .log(LogKind::Status, format!("{} sent: {}", label, key));
        Ok(())
    }

    async fn scroll(
        &self,
        page: &Page,
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<()> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(delta_x)
            .delta_y(delta_y)
            .modifiers(0)
            .build()
            .map_err(BrowserError::Other)?;
        page.execute(params).await?;

        debug!("Dispatched scroll dY={} at ({}, {})", delta_y, x, y);
        self.relay
            .log(LogKind::Status, format!("Scroll sent: dY={}", delta_y));
        Ok(())
    }
}

/// Whether the key name is a single printable character ("a", " ", "!")
/// rather than a named key ("Enter", "Backspace", "ArrowLeft").
fn printable_char(key: &str) -> bool {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => !c.is_control(),
        _ => false,
    }
}
