//! Configuration management
//!
//! Settings are resolved in this order:
//! 1. Environment variables
//! 2. `webeval.toml` configuration file
//! 3. Default values
//!
//! Inside the config file, `${VAR_NAME}` expands to the value of the
//! corresponding environment variable.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Error;

/// Dashboard relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bind host for the dashboard relay
    pub host: String,

    /// Bind port for the dashboard relay
    pub port: u16,

    /// Optional directory served as the dashboard front end
    pub static_dir: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            static_dir: None,
        }
    }
}

fn default_relay_host() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_port() -> u16 {
    5009
}

/// Browser engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Launch headless (the evaluate tool may override per call)
    pub headless: bool,

    /// Window/viewport width in CSS pixels
    pub viewport_width: u32,

    /// Window/viewport height in CSS pixels
    pub viewport_height: u32,

    /// Explicit Chrome/Chromium binary, otherwise auto-detected
    pub chrome_bin: Option<String>,

    /// Profile directory; a throwaway temp dir is used when unset
    pub user_data_dir: Option<String>,

    /// Persisted browser state file; defaults to the per-user config dir
    pub state_file: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            chrome_bin: None,
            user_data_dir: None,
            state_file: None,
        }
    }
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    800
}

/// Screencast delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScreencastMode {
    /// CDP frame push with per-frame acknowledgment
    #[default]
    FramePush,
    /// Fixed-interval screenshot polling
    Polling,
}

impl ScreencastMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "frame_push" | "framepush" | "push" => Some(ScreencastMode::FramePush),
            "polling" | "poll" => Some(ScreencastMode::Polling),
            _ => None,
        }
    }
}

/// Frame image format forwarded to the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Jpeg,
    Png,
}

impl FrameFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
        }
    }
}

/// Screencast bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreencastConfig {
    pub mode: ScreencastMode,

    /// Frame image format
    pub format: FrameFormat,

    /// Compression quality (jpeg only), 0-100
    pub quality: u32,

    /// Maximum frame width in pixels
    pub max_width: u32,

    /// Maximum frame height in pixels
    pub max_height: u32,

    /// Capture interval for polling mode, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ScreencastConfig {
    fn default() -> Self {
        Self {
            mode: ScreencastMode::default(),
            format: FrameFormat::default(),
            quality: default_screencast_quality(),
            max_width: 1920,
            max_height: 1080,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_screencast_quality() -> u32 {
    80
}

fn default_poll_interval_ms() -> u64 {
    100
}

/// Network capture filter policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Skip bundler/static assets, keep API-like paths and XHR/fetch traffic
    #[default]
    Api,
    /// Keep only XHR/fetch resource types
    Xhr,
    /// Keep everything
    All,
}

impl FilterMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "api" => Some(FilterMode::Api),
            "xhr" => Some(FilterMode::Xhr),
            "all" => Some(FilterMode::All),
            _ => None,
        }
    }
}

/// Telemetry capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Bounded buffer capacity for console and network entries
    pub max_entries: usize,

    /// Network request filter policy
    pub filter: FilterMode,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            filter: FilterMode::default(),
        }
    }
}

fn default_max_entries() -> usize {
    1000
}

/// Built-in agent selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Deterministic UX probe over the live page
    #[default]
    Probe,
    /// Fixed step list, for tests and dry runs
    Scripted,
}

impl AgentKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "probe" => Some(AgentKind::Probe),
            "scripted" => Some(AgentKind::Scripted),
            _ => None,
        }
    }
}

/// Agent runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub kind: AgentKind,

    /// Hard cap on agent steps per task
    pub max_steps: usize,

    /// Capture a screenshot after every step for the tool response
    pub step_screenshots: bool,

    /// Model identifier handed to LLM-backed agents, opaque to the runner
    pub model: Option<String>,

    /// API key handed to LLM-backed agents, opaque to the runner
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::default(),
            max_steps: default_max_steps(),
            step_screenshots: true,
            model: None,
            api_key: None,
        }
    }
}

fn default_max_steps() -> usize {
    25
}

/// Interactive state-setup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Wall-clock limit for the interactive login window, in seconds.
    /// Hitting it saves state the same as closing the tab does.
    pub timeout_secs: u64,

    /// Default URL opened when the setup tool is called without one
    pub default_url: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_setup_timeout_secs(),
            default_url: default_setup_url(),
        }
    }
}

fn default_setup_timeout_secs() -> u64 {
    180
}

fn default_setup_url() -> String {
    "http://localhost:5173".to_string()
}

/// Main configuration for webeval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub browser: BrowserConfig,
    pub screencast: ScreencastConfig,
    pub telemetry: TelemetryConfig,
    pub agent: AgentConfig,
    pub setup: SetupConfig,
}

impl Config {
    /// Expand `${VAR_NAME}` references to environment variable values.
    /// Unknown variables expand to the empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // consume '{'

                let mut var_name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(c);
                    chars.next();
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let expanded_content = Self::expand_env_vars(&toml_content);

        let mut config: Config = toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from the default locations.
    ///
    /// Tries `$WEBEVAL_CONFIG`, then `./webeval.toml`, then falls back to
    /// defaults plus environment overrides.
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("WEBEVAL_CONFIG") {
            return Self::from_toml_file(path);
        }

        if Path::new("webeval.toml").exists() {
            return Self::from_toml_file("webeval.toml");
        }

        Self::from_env()
    }

    /// Build configuration from defaults plus environment variables only.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment-variable overrides on top of the current values.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("RELAY_HOST") {
            if !host.is_empty() {
                self.relay.host = host;
            }
        }
        if let Ok(port) = std::env::var("RELAY_PORT") {
            if let Ok(p) = port.parse() {
                self.relay.port = p;
            }
        }
        if let Ok(dir) = std::env::var("RELAY_STATIC_DIR") {
            if !dir.is_empty() {
                self.relay.static_dir = Some(dir);
            }
        }

        if let Ok(headless) = std::env::var("BROWSER_HEADLESS") {
            self.browser.headless = headless.to_lowercase() != "false";
        }
        if let Ok(bin) = std::env::var("CHROME_BIN") {
            if !bin.is_empty() {
                self.browser.chrome_bin = Some(bin);
            }
        }
        if let Ok(dir) = std::env::var("BROWSER_USER_DATA_DIR") {
            if !dir.is_empty() {
                self.browser.user_data_dir = Some(dir);
            }
        }
        if let Ok(path) = std::env::var("STATE_FILE") {
            if !path.is_empty() {
                self.browser.state_file = Some(path);
            }
        }

        if let Ok(mode) = std::env::var("SCREENCAST_MODE") {
            if let Some(m) = ScreencastMode::parse(&mode) {
                self.screencast.mode = m;
            }
        }

        if let Ok(max) = std::env::var("TELEMETRY_MAX_ENTRIES") {
            if let Ok(n) = max.parse() {
                self.telemetry.max_entries = n;
            }
        }
        if let Ok(filter) = std::env::var("TELEMETRY_FILTER") {
            if let Some(f) = FilterMode::parse(&filter) {
                self.telemetry.filter = f;
            }
        }

        if let Ok(kind) = std::env::var("AGENT_KIND") {
            if let Some(k) = AgentKind::parse(&kind) {
                self.agent.kind = k;
            }
        }
        if let Ok(max) = std::env::var("AGENT_MAX_STEPS") {
            if let Ok(n) = max.parse() {
                self.agent.max_steps = n;
            }
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                self.agent.model = Some(model);
            }
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            if !key.is_empty() {
                self.agent.api_key = Some(key);
            }
        }

        if let Ok(secs) = std::env::var("SETUP_TIMEOUT_SECS") {
            if let Ok(n) = secs.parse() {
                self.setup.timeout_secs = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.host, "127.0.0.1");
        assert_eq!(config.relay.port, 5009);
        assert!(config.browser.headless);
        assert_eq!(config.screencast.mode, ScreencastMode::FramePush);
        assert_eq!(config.screencast.quality, 80);
        assert_eq!(config.telemetry.max_entries, 1000);
        assert_eq!(config.telemetry.filter, FilterMode::Api);
        assert_eq!(config.agent.kind, AgentKind::Probe);
        assert_eq!(config.agent.max_steps, 25);
        assert_eq!(config.setup.timeout_secs, 180);
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("WEBEVAL_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${WEBEVAL_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("WEBEVAL_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        let result = Config::expand_env_vars("no_vars_here");
        assert_eq!(result, "no_vars_here");
    }

    #[test]
    fn test_screencast_mode_parse() {
        assert_eq!(
            ScreencastMode::parse("frame_push"),
            Some(ScreencastMode::FramePush)
        );
        assert_eq!(ScreencastMode::parse("POLLING"), Some(ScreencastMode::Polling));
        assert_eq!(ScreencastMode::parse("bogus"), None);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_content = r#"
[relay]
host = "0.0.0.0"
port = 6001

[browser]
headless = false
viewport_width = 1440

[screencast]
mode = "polling"
quality = 60

[telemetry]
max_entries = 50
filter = "xhr"

[agent]
kind = "scripted"
max_steps = 5

[setup]
timeout_secs = 30
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.relay.host, "0.0.0.0");
        assert_eq!(config.relay.port, 6001);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.viewport_width, 1440);
        // Unset fields keep their defaults
        assert_eq!(config.browser.viewport_height, 800);
        assert_eq!(config.screencast.mode, ScreencastMode::Polling);
        assert_eq!(config.screencast.quality, 60);
        assert_eq!(config.telemetry.max_entries, 50);
        assert_eq!(config.telemetry.filter, FilterMode::Xhr);
        assert_eq!(config.agent.kind, AgentKind::Scripted);
        assert_eq!(config.agent.max_steps, 5);
        assert_eq!(config.setup.timeout_secs, 30);
    }

    #[test]
    fn test_from_toml_file_with_expansion() {
        use std::io::Write;

        unsafe {
            std::env::set_var("WEBEVAL_TEST_HOST", "192.168.0.7");
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nhost = \"${{WEBEVAL_TEST_HOST}}\"").unwrap();

        let config = Config::from_toml_file(file.path()).unwrap();
        assert_eq!(config.relay.host, "192.168.0.7");

        unsafe {
            std::env::remove_var("WEBEVAL_TEST_HOST");
        }
    }

    #[test]
    fn test_frame_format_mime() {
        assert_eq!(FrameFormat::Jpeg.mime(), "image/jpeg");
        assert_eq!(FrameFormat::Png.mime(), "image/png");
    }
}
