//! Browser session lifecycle
//!
//! One manager owns at most one browser and one active page. Opening a
//! session tears the previous one down first; closing is a best-effort
//! cascade that is safe to run twice or before anything was opened. All
//! lifecycle transitions are serialized behind one async lock, so a tool
//! call never races another against the same browser.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::{Browser, BrowserConfig as ChromeConfig, Page};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use webeval_core::config::{BrowserConfig, Config};
use webeval_core::{ControlAction, LogKind};
use webeval_relay::{InboundEvent, Relay};

use crate::error::{BrowserError, Result};
use crate::input::InputRelay;
use crate::screencast::Screencast;
use crate::state::{self, PersistedState};
use crate::telemetry::{self, TelemetryBuffers, TelemetryHandle};

/// How often the interactive setup flow checks that its tab is still open.
const LIVENESS_POLL: Duration = Duration::from_secs(2);

/// How long browser shutdown may take before we stop waiting for the child.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared with the input relay and the screencast task.
///
/// The page slot and the screencast flag are the input preconditions; both
/// are cleared eagerly when a dead session is detected so later input fails
/// the check instead of hitting a closed target.
pub struct SessionShared {
    page: std::sync::Mutex<Option<Page>>,
    screencast_running: Arc<AtomicBool>,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            page: std::sync::Mutex::new(None),
            screencast_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clone of the active page, if any.
    pub fn page(&self) -> Option<Page> {
        self.page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_page(&self) -> bool {
        self.page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn set_page(&self, page: Page) {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner) = Some(page);
    }

    pub fn clear_page(&self) {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn take_page(&self) -> Option<Page> {
        self.page
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn screencast_running(&self) -> bool {
        self.screencast_running.load(Ordering::SeqCst)
    }

    pub fn set_screencast_running(&self, running: bool) {
        self.screencast_running.store(running, Ordering::SeqCst);
    }

    /// The flag itself, for the screencast task to own a handle to.
    pub(crate) fn screencast_flag(&self) -> Arc<AtomicBool> {
        self.screencast_running.clone()
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for dashboard control actions while an agent run is active.
type ControlHandler = Box<dyn Fn(ControlAction) + Send + Sync>;

#[derive(Default)]
struct Inner {
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    headless: Option<bool>,
    telemetry: Option<TelemetryHandle>,
    screencast: Option<Screencast>,
    inbound_task: Option<JoinHandle<()>>,
}

/// Owns the single live browser session.
pub struct SessionManager {
    config: Config,
    relay: Relay,
    shared: Arc<SessionShared>,
    buffers: Arc<TelemetryBuffers>,
    controls: Arc<std::sync::Mutex<Option<ControlHandler>>>,
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new(config: Config, relay: Relay) -> Self {
        let buffers = Arc::new(TelemetryBuffers::new(config.telemetry.max_entries));
        Self {
            config,
            relay,
            shared: Arc::new(SessionShared::new()),
            buffers,
            controls: Arc::new(std::sync::Mutex::new(None)),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Telemetry captured for the current session.
    pub fn buffers(&self) -> Arc<TelemetryBuffers> {
        self.buffers.clone()
    }

    /// The active page, for the agent runner.
    pub fn page(&self) -> Option<Page> {
        self.shared.page()
    }

    /// Route dashboard control actions to the current agent run.
    pub fn set_control_handler(&self, handler: impl Fn(ControlAction) + Send + Sync + 'static) {
        *self
            .controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(handler));
    }

    /// Detach the control route once the run is over.
    pub fn clear_control_handler(&self) {
        *self
            .controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Launch the browser if it is not already running in the wanted mode.
    /// Also brings the dashboard relay up; a relay failure degrades to an
    /// evaluation without live view rather than aborting.
    pub async fn initialize(&self, headless: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_browser(&mut inner, headless).await
    }

    async fn ensure_browser(&self, inner: &mut Inner, headless: bool) -> Result<()> {
        if inner.browser.is_some() && inner.headless == Some(headless) {
            return Ok(());
        }
        if inner.browser.is_some() {
            info!("Relaunching browser to switch headless mode");
            self.teardown(inner).await;
        }

        if let Err(e) = self.relay.ensure_started().await {
            warn!("Dashboard relay unavailable, continuing without live view: {}", e);
        }

        let chrome = chrome_config(&self.config.browser, headless)?;
        let (browser, mut handler) = Browser::launch(chrome)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler: {}", e);
                }
            }
            debug!("Browser handler stream ended");
        });

        info!("Browser launched (headless={})", headless);
        self.relay.log(LogKind::Status, "Browser initialized");

        inner.browser = Some(browser);
        inner.handler_task = Some(handler_task);
        inner.headless = Some(headless);
        Ok(())
    }

    /// Open `url` in a fresh page and start streaming it to the dashboard.
    ///
    /// Any previous page is torn down first. Telemetry listeners are
    /// attached before navigation so the first request wave is captured.
    /// A screencast failure does not fail the open; the returned status
    /// string says whether streaming is live.
    pub async fn open_session(&self, url: &str, headless: bool) -> Result<String> {
        let mut inner = self.inner.lock().await;
        self.ensure_browser(&mut inner, headless).await?;
        self.close_page(&mut inner).await;
        self.buffers.clear();

        let browser = inner.browser.as_ref().ok_or(BrowserError::NoSession)?;
        let page = browser.new_page("about:blank").await?;

        let handle = telemetry::attach(
            &page,
            self.buffers.clone(),
            self.relay.clone(),
            &self.config.telemetry,
        )
        .await?;
        inner.telemetry = Some(handle);

        if let Some(path) = state::resolve_state_path(&self.config.browser) {
            let saved = PersistedState::load(&path);
            if !saved.is_empty() {
                info!("Applying saved browser state from {}", path.display());
                if let Err(e) = state::apply(&page, &saved).await {
                    warn!("Could not apply saved browser state: {}", e);
                    self.relay.log(
                        LogKind::Status,
                        format!("Could not apply saved browser state: {}", e),
                    );
                }
            }
        }

        page.goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(format!("{}: {}", url, e)))?;
        if let Err(e) = page.wait_for_navigation().await {
            debug!("Navigation settle wait failed: {}", e);
        }

        let mode = if headless { "headless" } else { "headed" };
        self.relay
            .log(LogKind::Agent, format!("Navigated to: {} ({} mode)", url, mode));

        self.shared.set_page(page.clone());
        self.register_inbound(&mut inner).await;

        match Screencast::start(
            &page,
            &self.config.screencast,
            self.relay.clone(),
            self.shared.screencast_flag(),
        )
        .await
        {
            Ok(cast) => {
                inner.screencast = Some(cast);
                Ok(format!(
                    "Opened {} successfully in {} mode. Streaming view to dashboard.",
                    url, mode
                ))
            }
            Err(e) => {
                warn!("Failed to start screencast: {}", e);
                self.relay.log(
                    LogKind::Status,
                    format!("Failed to start screencast: {}", e),
                );
                Ok(format!("Opened {}, but failed to start screen streaming.", url))
            }
        }
    }

    /// Consume inbound dashboard events for the lifetime of the session.
    async fn register_inbound(&self, inner: &mut Inner) {
        if let Some(task) = inner.inbound_task.take() {
            task.abort();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.relay.register_sink(tx).await;

        let input = InputRelay::new(self.shared.clone(), self.relay.clone());
        let controls = self.controls.clone();
        let relay = self.relay.clone();
        inner.inbound_task = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    InboundEvent::Input(ev) => input.dispatch(ev).await,
                    InboundEvent::Control(action) => {
                        let handler = controls.lock().unwrap_or_else(PoisonError::into_inner);
                        match handler.as_ref() {
                            Some(h) => h(action),
                            None => relay.log(
                                LogKind::Status,
                                format!("Ignored {} control: no agent running", action.as_str()),
                            ),
                        }
                    }
                }
            }
            debug!("Inbound event loop ended");
        }));
    }

    /// Tear down the page and everything hanging off it. Browser stays up.
    async fn close_page(&self, inner: &mut Inner) {
        if let Some(cast) = inner.screencast.take() {
            let page = self.shared.page();
            cast.stop(page.as_ref()).await;
        }
        self.shared.set_screencast_running(false);

        if let Some(handle) = inner.telemetry.take() {
            handle.stop();
        }

        if let Some(page) = self.shared.take_page() {
            if let Err(e) = page.close().await {
                debug!("Could not close page: {}", e);
            }
        }

        if let Some(task) = inner.inbound_task.take() {
            task.abort();
        }
        self.relay.unregister_sink().await;
    }

    /// Close everything, in reverse order of creation. Every step is
    /// best-effort; a failing one never blocks the rest. Safe to call
    /// twice or before `initialize`.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
    }

    async fn teardown(&self, inner: &mut Inner) {
        self.close_page(inner).await;

        if let Some(mut browser) = inner.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Could not close browser: {}", e);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, browser.wait())
                .await
                .is_err()
            {
                warn!("Browser did not exit within {:?}", SHUTDOWN_GRACE);
            }
        }

        if let Some(task) = inner.handler_task.take() {
            task.abort();
        }
        inner.headless = None;

        self.buffers.clear();
        self.relay.log(LogKind::Status, "Browser manager closed.");
    }

    /// Interactive login flow: open a visible browser on `url`, let the
    /// user sign in, and persist cookies + localStorage once they close
    /// the tab or the window times out. Both endings count as success.
    pub async fn setup_state(&self, url: Option<&str>) -> Result<String> {
        let target = url
            .map(str::to_string)
            .unwrap_or_else(|| self.config.setup.default_url.clone());

        let mut inner = self.inner.lock().await;
        self.ensure_browser(&mut inner, false).await?;
        self.close_page(&mut inner).await;

        let browser = inner.browser.as_ref().ok_or(BrowserError::NoSession)?;
        let page = browser.new_page("about:blank").await?;

        let state_path = state::resolve_state_path(&self.config.browser);
        let mut saved = state_path
            .as_deref()
            .map(PersistedState::load)
            .unwrap_or_default();
        if !saved.is_empty() {
            if let Err(e) = state::apply(&page, &saved).await {
                warn!("Could not pre-load saved browser state: {}", e);
            }
        }

        page.goto(target.as_str())
            .await
            .map_err(|e| BrowserError::Navigation(format!("{}: {}", target, e)))?;

        info!(
            "Interactive state setup at {} (up to {}s)",
            target, self.config.setup.timeout_secs
        );
        self.relay.log(
            LogKind::Status,
            format!(
                "Browser opened for login at {}. Close the tab when finished.",
                target
            ),
        );

        let window = Duration::from_secs(self.config.setup.timeout_secs);
        let collected = match tokio::time::timeout(window, watch_login_page(&page)).await {
            Ok(snapshot) => {
                info!("Login tab closed, saving browser state");
                snapshot
            }
            Err(_) => {
                // Timed out with the tab still open; snapshot it as-is
                info!("Login window timed out, saving browser state");
                match state::collect(&page).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("Could not collect browser state: {}", e);
                        PersistedState::default()
                    }
                }
            }
        };

        saved.merge(collected);
        let save_result = state_path
            .ok_or_else(|| {
                BrowserError::State("No writable location for browser state".to_string())
            })
            .and_then(|path| saved.save(&path).map(|_| path));

        self.teardown(&mut inner).await;

        let path = save_result?;
        let message = format!(
            "Browser state saved to {} ({} cookies, {} origins).",
            path.display(),
            saved.cookies.len(),
            saved.origins.len()
        );
        self.relay.log(LogKind::Status, message.clone());
        Ok(message)
    }
}

/// Poll the login tab until it goes away, keeping the freshest state
/// snapshot we managed to take while it was alive.
async fn watch_login_page(page: &Page) -> PersistedState {
    let mut latest = PersistedState::default();
    loop {
        tokio::time::sleep(LIVENESS_POLL).await;
        match page.evaluate("1").await {
            Ok(_) => {
                if let Ok(snapshot) = state::collect(page).await {
                    latest = snapshot;
                }
            }
            Err(e) => {
                debug!("Login page no longer reachable: {}", e);
                break;
            }
        }
    }
    latest
}

/// Translate our browser settings into a chromiumoxide launch config.
fn chrome_config(config: &BrowserConfig, headless: bool) -> Result<ChromeConfig> {
    let mut builder = ChromeConfig::builder();

    if let Some(bin) = &config.chrome_bin {
        builder = builder.chrome_executable(bin);
    }

    let user_data_dir = match &config.user_data_dir {
        Some(dir) => dir.clone(),
        None => {
            let ts = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            format!("/tmp/webeval-{}-{}", std::process::id(), ts)
        }
    };

    let mode = if headless {
        HeadlessMode::New
    } else {
        HeadlessMode::False
    };

    builder = builder
        .user_data_dir(user_data_dir)
        .headless_mode(mode)
        .window_size(config.viewport_width, config.viewport_height)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-background-networking")
        .arg("--disable-hang-monitor")
        .arg("--remote-allow-origins=*")
        .request_timeout(Duration::from_secs(60));

    builder.build().map_err(BrowserError::Launch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use webeval_core::config::RelayConfig;

    fn test_manager() -> SessionManager {
        let relay = Relay::new(RelayConfig::default());
        SessionManager::new(Config::default(), relay)
    }

    #[test]
    fn test_shared_page_slot() {
        let shared = SessionShared::new();
        assert!(!shared.has_page());
        assert!(shared.page().is_none());

        shared.clear_page();
        assert!(!shared.has_page());
    }

    #[test]
    fn test_shared_screencast_flag() {
        let shared = SessionShared::new();
        assert!(!shared.screencast_running());

        shared.set_screencast_running(true);
        assert!(shared.screencast_running());

        // The handed-out flag and the accessor see the same state
        let flag = shared.screencast_flag();
        flag.store(false, Ordering::SeqCst);
        assert!(!shared.screencast_running());
    }

    #[tokio::test]
    async fn test_close_before_initialize_is_safe() {
        let manager = test_manager();
        manager.close().await;
        manager.close().await;
        assert!(manager.page().is_none());
    }

    #[tokio::test]
    async fn test_close_reports_to_dashboard() {
        let manager = test_manager();
        let mut rx = manager.relay().subscribe();

        manager.close().await;

        let json = rx.recv().await.unwrap();
        assert!(json.contains("Browser manager closed."));
    }

    #[tokio::test]
    async fn test_control_handler_roundtrip() {
        let manager = test_manager();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        {
            let seen = seen.clone();
            manager.set_control_handler(move |action| {
                seen.lock().unwrap().push(action);
            });
        }

        let controls = manager.controls.lock().unwrap();
        if let Some(handler) = controls.as_ref() {
            handler(ControlAction::Pause);
            handler(ControlAction::Stop);
        }
        drop(controls);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ControlAction::Pause, ControlAction::Stop]
        );

        manager.clear_control_handler();
        assert!(manager.controls.lock().unwrap().is_none());
    }

    // An explicit binary path keeps the builder from probing the machine
    // for an installed Chrome.
    fn test_browser_config() -> BrowserConfig {
        BrowserConfig {
            chrome_bin: Some("/usr/bin/chromium".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_chrome_config_builds() {
        let config = test_browser_config();
        assert!(chrome_config(&config, true).is_ok());
        assert!(chrome_config(&config, false).is_ok());
    }

    #[test]
    fn test_chrome_config_honors_explicit_profile() {
        let config = BrowserConfig {
            user_data_dir: Some("/tmp/webeval-test-profile".to_string()),
            ..test_browser_config()
        };
        assert!(chrome_config(&config, true).is_ok());
    }
}
