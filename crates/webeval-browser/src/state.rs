//! Persisted browser state
//!
//! Cookies and per-origin localStorage survive between runs in a JSON file,
//! so evaluations can reuse a login captured during interactive setup. A
//! missing or corrupt file degrades to "no saved state" with a warning,
//! never a startup failure.

use std::path::{Path, PathBuf};

use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use webeval_core::config::BrowserConfig;

use crate::error::{BrowserError, Result};

/// One localStorage key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

/// localStorage contents for one origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginState {
    pub origin: String,
    #[serde(rename = "localStorage", default)]
    pub local_storage: Vec<StorageItem>,
}

/// Saved browser state: cookies plus per-origin localStorage.
///
/// Cookies are kept as raw JSON objects in CDP wire shape (camelCase keys),
/// so anything the browser reported round-trips without loss.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

impl PersistedState {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.is_empty()
    }

    /// Load saved state from `path`. Missing file means empty state;
    /// unreadable or corrupt files degrade to empty state with a warning.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("No saved browser state at {}", path.display());
            return Self::default();
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read browser state {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "Ignoring corrupt browser state {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Write the state to `path` atomically: temp file in the same
    /// directory, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BrowserError::State(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BrowserError::State(format!("Failed to serialize state: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            BrowserError::State(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            BrowserError::State(format!("Failed to move state into place: {}", e))
        })?;

        debug!(
            "Saved browser state to {} ({} cookies, {} origins)",
            path.display(),
            self.cookies.len(),
            self.origins.len()
        );
        Ok(())
    }

    /// Cookies converted into CDP set-cookie parameters. Entries that do
    /// not convert are dropped with a warning.
    pub fn cookie_params(&self) -> Vec<CookieParam> {
        self.cookies
            .iter()
            .filter_map(|value| {
                match serde_json::from_value::<CookieParam>(value.clone()) {
                    Ok(param) => Some(param),
                    Err(e) => {
                        warn!("Skipping unusable saved cookie: {}", e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Merge a newer snapshot into this one. Cookies are replaced wholesale;
    /// origins are merged by name so storage collected on earlier pages is
    /// kept when the user navigates elsewhere.
    pub fn merge(&mut self, newer: PersistedState) {
        if !newer.cookies.is_empty() {
            self.cookies = newer.cookies;
        }
        for origin in newer.origins {
            match self.origins.iter_mut().find(|o| o.origin == origin.origin) {
                Some(existing) => existing.local_storage = origin.local_storage,
                None => self.origins.push(origin),
            }
        }
    }
}

/// Resolve the state file location: explicit config first, then
/// `<user config dir>/webeval/browser_state.json`.
pub fn resolve_state_path(config: &BrowserConfig) -> Option<PathBuf> {
    if let Some(path) = &config.state_file {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("webeval").join("browser_state.json"))
}

/// Snapshot the live page: cookies visible to it plus the current origin's
/// localStorage.
pub async fn collect(page: &Page) -> Result<PersistedState> {
    let cookies = page
        .get_cookies()
        .await?
        .into_iter()
        .map(|cookie| {
            serde_json::to_value(&cookie)
                .map_err(|e| BrowserError::State(format!("Cookie did not serialize: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let origin = page
        .evaluate(COLLECT_STORAGE_JS)
        .await?
        .into_value::<OriginState>()
        .map_err(|e| BrowserError::State(format!("Unexpected storage shape: {}", e)))?;

    let origins = if origin.origin.starts_with("http") {
        vec![origin]
    } else {
        // about:blank and friends have no storage worth keeping
        Vec::new()
    };

    Ok(PersistedState { cookies, origins })
}

/// Restore saved state into a fresh page: cookies through CDP, then
/// localStorage by visiting each saved origin. Best-effort per origin; the
/// caller navigates to its real target afterwards.
pub async fn apply(page: &Page, state: &PersistedState) -> Result<()> {
    let cookies = state.cookie_params();
    if !cookies.is_empty() {
        page.set_cookies(cookies).await?;
    }

    for origin in &state.origins {
        if origin.local_storage.is_empty() {
            continue;
        }
        if let Err(e) = restore_origin_storage(page, origin).await {
            warn!(
                "Failed to restore localStorage for {}: {}",
                origin.origin, e
            );
        }
    }
    Ok(())
}

async fn restore_origin_storage(page: &Page, origin: &OriginState) -> Result<()> {
    page.goto(origin.origin.as_str()).await?;

    let payload = serde_json::to_string(&origin.local_storage)
        .map_err(|e| BrowserError::State(format!("Storage did not serialize: {}", e)))?;
    let script = format!(
        "(() => {{ const items = {payload}; \
         for (const item of items) {{ localStorage.setItem(item.name, item.value); }} \
         return items.length; }})()"
    );
    page.evaluate(script).await?;
    Ok(())
}

const COLLECT_STORAGE_JS: &str = r#"(() => {
  const items = [];
  for (let i = 0; i < localStorage.length; i++) {
    const name = localStorage.key(i);
    items.push({ name: name, value: localStorage.getItem(name) });
  }
  return { origin: window.location.origin, localStorage: items };
})()"#;
