//! Console and network telemetry capture
//!
//! Listeners are attached when the page is created, before navigation, so
//! the first request wave is never missed. Captured entries land in bounded
//! FIFO buffers that the report formatter snapshots after a run; a one-line
//! summary of every entry is also forwarded to the dashboard.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
};
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use webeval_core::config::{FilterMode, TelemetryConfig};
use webeval_core::{ConsoleKind, ConsoleLogEntry, LogKind, NetworkEvent};
use webeval_relay::Relay;

use crate::error::Result;

/// Static asset extensions dropped by the `api` filter. Checked against the
/// URL path with query string and fragment stripped.
const STATIC_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".woff", ".woff2", ".ttf", ".eot", ".svg", ".png", ".jpg", ".jpeg", ".gif",
    ".ico", ".map",
];

/// Bounded telemetry buffers shared between listener tasks and the
/// formatter. Oldest entries are evicted once a buffer is full.
pub struct TelemetryBuffers {
    console: Mutex<VecDeque<ConsoleLogEntry>>,
    network: Mutex<VecDeque<NetworkEvent>>,
    capacity: usize,
}

impl TelemetryBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            console: Mutex::new(VecDeque::new()),
            network: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push_console(&self, entry: ConsoleLogEntry) {
        let mut buf = self
            .console
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    pub fn push_network(&self, event: NetworkEvent) {
        let mut buf = self
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(event);
    }

    /// Fill in response fields on the retained request with this id that has
    /// no response yet. Returns false when nothing matched.
    pub fn attach_response(
        &self,
        request_id: &str,
        status: i64,
        headers: serde_json::Value,
        body_size: i64,
    ) -> bool {
        let mut buf = self
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match buf
            .iter_mut()
            .find(|e| e.request_id == request_id && e.status.is_none())
        {
            Some(entry) => {
                entry.status = Some(status);
                entry.response_headers = Some(headers);
                entry.body_size = Some(body_size);
                entry.response_timestamp = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Mark the retained request with this id as failed. Returns its URL
    /// when something matched.
    pub fn attach_failure(&self, request_id: &str, reason: &str) -> Option<String> {
        let mut buf = self
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match buf
            .iter_mut()
            .find(|e| e.request_id == request_id && e.failure.is_none())
        {
            Some(entry) => {
                entry.failure = Some(reason.to_string());
                Some(entry.url.clone())
            }
            None => None,
        }
    }

    pub fn console_snapshot(&self) -> Vec<ConsoleLogEntry> {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn network_snapshot(&self) -> Vec<NetworkEvent> {
        self.network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Decide whether a request is worth keeping.
///
/// The `api` policy drops bundler and static-asset noise: anything under
/// `/node_modules/` and the usual asset extensions. API-looking paths
/// (`/api/`, `/graphql`) and XHR/fetch traffic are always kept.
pub fn should_capture(mode: FilterMode, url: &str, xhr_like: bool) -> bool {
    match mode {
        FilterMode::All => true,
        FilterMode::Xhr => xhr_like,
        FilterMode::Api => {
            if url.contains("/node_modules/") {
                return false;
            }
            if url.contains("/api/") || url.contains("/graphql") {
                return true;
            }
            if xhr_like {
                return true;
            }
            !has_static_extension(url)
        }
    }
}

fn has_static_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn xhr_like(resource_type: Option<&ResourceType>) -> bool {
    matches!(
        resource_type,
        Some(ResourceType::Xhr) | Some(ResourceType::Fetch)
    )
}

/// Running telemetry listener tasks for one page.
pub struct TelemetryHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl TelemetryHandle {
    /// Abort every listener task.
    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Subscribe every telemetry listener on the page and spawn their forward
/// loops. Must run before navigation.
pub async fn attach(
    page: &Page,
    buffers: Arc<TelemetryBuffers>,
    relay: Relay,
    config: &TelemetryConfig,
) -> Result<TelemetryHandle> {
    let filter = config.filter;
    let mut tasks = Vec::with_capacity(5);

    let mut console_events = page.event_listener::<EventConsoleApiCalled>().await?;
    {
        let buffers = buffers.clone();
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                on_console_message(&event, &buffers, &relay);
            }
        }));
    }

    let mut exception_events = page.event_listener::<EventExceptionThrown>().await?;
    {
        let buffers = buffers.clone();
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = exception_events.next().await {
                on_exception(&event, &buffers, &relay);
            }
        }));
    }

    let mut request_events = page.event_listener::<EventRequestWillBeSent>().await?;
    {
        let buffers = buffers.clone();
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = request_events.next().await {
                on_request(&event, &buffers, &relay, filter);
            }
        }));
    }

    let mut response_events = page.event_listener::<EventResponseReceived>().await?;
    {
        let buffers = buffers.clone();
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = response_events.next().await {
                on_response(&event, &buffers, &relay, filter);
            }
        }));
    }

    let mut failure_events = page.event_listener::<EventLoadingFailed>().await?;
    {
        let buffers = buffers.clone();
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = failure_events.next().await {
                on_loading_failed(&event, &buffers, &relay);
            }
        }));
    }

    debug!("Telemetry listeners attached");
    Ok(TelemetryHandle { tasks })
}

fn record_console(entry: ConsoleLogEntry, buffers: &TelemetryBuffers, relay: &Relay) {
    relay.log(
        LogKind::Console,
        format!("CONSOLE [{}]: {}", entry.kind.as_str(), entry.text),
    );
    buffers.push_console(entry);
}

fn on_console_message(event: &EventConsoleApiCalled, buffers: &TelemetryBuffers, relay: &Relay) {
    let kind = console_kind(&event.r#type);
    let mut entry = ConsoleLogEntry::new(kind, console_text(&event.args));

    if let Some(frame) = event
        .stack_trace
        .as_ref()
        .and_then(|st| st.call_frames.first())
    {
        if !frame.url.is_empty() {
            entry = entry.with_source(format!("{}:{}", frame.url, frame.line_number));
        }
    }

    record_console(entry, buffers, relay);
}

fn on_exception(event: &EventExceptionThrown, buffers: &TelemetryBuffers, relay: &Relay) {
    let details = &event.exception_details;
    let description = details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .unwrap_or_else(|| details.text.clone());

    let text = if description.starts_with(&details.text) || details.text.is_empty() {
        description
    } else {
        format!("{} {}", details.text, description)
    };

    let mut entry = ConsoleLogEntry::new(ConsoleKind::Error, text);
    if let Some(url) = &details.url {
        entry = entry.with_source(format!("{}:{}", url, details.line_number));
    }

    record_console(entry, buffers, relay);
}

fn on_request(
    event: &EventRequestWillBeSent,
    buffers: &TelemetryBuffers,
    relay: &Relay,
    filter: FilterMode,
) {
    let url = &event.request.url;
    if !should_capture(filter, url, xhr_like(event.r#type.as_ref())) {
        return;
    }

    let request_id: &str = event.request_id.as_ref();
    let resource_type = event
        .r#type
        .as_ref()
        .map(|t| format!("{:?}", t))
        .unwrap_or_else(|| "Other".to_string());

    let mut entry = NetworkEvent::request(request_id, &event.request.method, url, resource_type);
    entry.request_headers = serde_json::to_value(&event.request.headers)
        .unwrap_or_else(|e| serde_json::json!({ "error": format!("Req Header Error: {}", e) }));
    entry.request_body = event.request.post_data_entries.as_ref().map(|entries| {
        entries
            .iter()
            .filter_map(|e| e.bytes.clone())
            .map(String::from)
            .collect()
    });

    relay.log(
        LogKind::Network,
        format!("NET REQ [{}]: {}", event.request.method, url),
    );
    buffers.push_network(entry);
}

fn on_response(
    event: &EventResponseReceived,
    buffers: &TelemetryBuffers,
    relay: &Relay,
    filter: FilterMode,
) {
    let url = &event.response.url;
    if !should_capture(filter, url, xhr_like(Some(&event.r#type))) {
        return;
    }

    let request_id: &str = event.request_id.as_ref();
    let status = event.response.status;
    let headers = serde_json::to_value(&event.response.headers)
        .unwrap_or_else(|e| serde_json::json!({ "error": format!("Resp Header Error: {}", e) }));
    let body_size = event.response.encoded_data_length as i64;

    if buffers.attach_response(request_id, status, headers.clone(), body_size) {
        relay.log(LogKind::Network, format!("NET RESP [{}]: {}", status, url));
        return;
    }

    // Response without a retained request; keep it as its own entry so it
    // still shows up in the report.
    let mut entry = NetworkEvent::request(request_id, "-", url, format!("{:?}", event.r#type));
    entry.status = Some(status);
    entry.response_headers = Some(headers);
    entry.body_size = Some(body_size);
    entry.response_timestamp = Some(Utc::now());

    relay.log(
        LogKind::Network,
        format!("NET RESP* [{}]: {} (req not matched/updated)", status, url),
    );
    buffers.push_network(entry);
}

fn on_loading_failed(event: &EventLoadingFailed, buffers: &TelemetryBuffers, relay: &Relay) {
    // Canceled loads are routine (navigation aborts in-flight requests)
    if event.canceled == Some(true) {
        return;
    }

    let request_id: &str = event.request_id.as_ref();
    if let Some(url) = buffers.attach_failure(request_id, &event.error_text) {
        let entry = ConsoleLogEntry::new(
            ConsoleKind::Error,
            format!("Network request failed: {} ({})", url, event.error_text),
        );
        record_console(entry, buffers, relay);
    }
}

fn console_kind(t: &ConsoleApiCalledType) -> ConsoleKind {
    match t {
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => ConsoleKind::Error,
        ConsoleApiCalledType::Warning => ConsoleKind::Warn,
        ConsoleApiCalledType::Debug => ConsoleKind::Debug,
        ConsoleApiCalledType::Info => ConsoleKind::Info,
        _ => ConsoleKind::Log,
    }
}

fn console_text(args: &[RemoteObject]) -> String {
    args.iter()
        .map(describe_remote_object)
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_remote_object(obj: &RemoteObject) -> String {
    if let Some(value) = &obj.value {
        match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    } else if let Some(description) = &obj.description {
        description.clone()
    } else {
        "undefined".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console_entry(text: &str) -> ConsoleLogEntry {
        ConsoleLogEntry::new(ConsoleKind::Log, text)
    }

    #[test]
    fn test_console_buffer_evicts_oldest() {
        let buffers = TelemetryBuffers::new(3);
        for i in 0..5 {
            buffers.push_console(console_entry(&format!("msg {}", i)));
        }

        let snapshot = buffers.console_snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].text, "msg 2");
        assert_eq!(snapshot[2].text, "msg 4");
    }

    #[test]
    fn test_network_buffer_evicts_oldest() {
        let buffers = TelemetryBuffers::new(2);
        for i in 0..4 {
            buffers.push_network(NetworkEvent::request(
                format!("req-{}", i),
                "GET",
                format!("http://localhost/api/{}", i),
                "Fetch",
            ));
        }

        let snapshot = buffers.network_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].request_id, "req-2");
    }

    #[test]
    fn test_attach_response_augments_in_place() {
        let buffers = TelemetryBuffers::new(10);
        buffers.push_network(NetworkEvent::request(
            "req-1",
            "POST",
            "http://localhost/api/login",
            "Fetch",
        ));

        let matched = buffers.attach_response("req-1", 200, serde_json::json!({}), 128);
        assert!(matched);

        let snapshot = buffers.network_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, Some(200));
        assert_eq!(snapshot[0].body_size, Some(128));
        assert!(snapshot[0].response_timestamp.is_some());
    }

    #[test]
    fn test_attach_response_ignores_already_answered() {
        let buffers = TelemetryBuffers::new(10);
        buffers.push_network(NetworkEvent::request(
            "req-1",
            "GET",
            "http://localhost/api/data",
            "Fetch",
        ));

        assert!(buffers.attach_response("req-1", 200, serde_json::json!({}), 10));
        // A second response for the same id must not overwrite the first
        assert!(!buffers.attach_response("req-1", 500, serde_json::json!({}), 10));

        let snapshot = buffers.network_snapshot();
        assert_eq!(snapshot[0].status, Some(200));
    }

    #[test]
    fn test_attach_response_unmatched_id() {
        let buffers = TelemetryBuffers::new(10);
        assert!(!buffers.attach_response("ghost", 404, serde_json::json!({}), 0));
    }

    #[test]
    fn test_attach_failure_marks_entry() {
        let buffers = TelemetryBuffers::new(10);
        buffers.push_network(NetworkEvent::request(
            "req-9",
            "GET",
            "http://localhost/api/flaky",
            "Xhr",
        ));

        let url = buffers.attach_failure("req-9", "net::ERR_CONNECTION_REFUSED");
        assert_eq!(url.as_deref(), Some("http://localhost/api/flaky"));

        let snapshot = buffers.network_snapshot();
        assert!(snapshot[0].is_failed());
        assert_eq!(
            snapshot[0].failure.as_deref(),
            Some("net::ERR_CONNECTION_REFUSED")
        );
    }

    #[test]
    fn test_clear_resets_both_buffers() {
        let buffers = TelemetryBuffers::new(10);
        buffers.push_console(console_entry("hello"));
        buffers.push_network(NetworkEvent::request("r", "GET", "http://x/", "Document"));

        buffers.clear();
        assert!(buffers.console_snapshot().is_empty());
        assert!(buffers.network_snapshot().is_empty());
    }

    #[test]
    fn test_filter_skips_node_modules() {
        assert!(!should_capture(
            FilterMode::Api,
            "http://localhost:5173/node_modules/react/index.js",
            false
        ));
    }

    #[test]
    fn test_filter_skips_static_extensions() {
        assert!(!should_capture(
            FilterMode::Api,
            "http://localhost:5173/assets/logo.png",
            false
        ));
        // Query string is stripped before the extension check
        assert!(!should_capture(
            FilterMode::Api,
            "http://localhost:5173/main.js?v=12345",
            false
        ));
        assert!(!should_capture(
            FilterMode::Api,
            "http://localhost:5173/styles.css#section",
            false
        ));
    }

    #[test]
    fn test_filter_always_keeps_api_paths() {
        assert!(should_capture(
            FilterMode::Api,
            "http://localhost:5173/api/users",
            false
        ));
        // The api rule wins over the extension rule
        assert!(should_capture(
            FilterMode::Api,
            "http://localhost:5173/api/config.js",
            false
        ));
        assert!(should_capture(
            FilterMode::Api,
            "http://localhost:5173/graphql",
            false
        ));
    }

    #[test]
    fn test_filter_keeps_xhr_and_navigations() {
        assert!(should_capture(
            FilterMode::Api,
            "http://localhost:5173/data.json",
            true
        ));
        assert!(should_capture(FilterMode::Api, "http://localhost:5173/", false));
        assert!(should_capture(
            FilterMode::Api,
            "http://localhost:5173/settings",
            false
        ));
    }

    #[test]
    fn test_filter_modes() {
        assert!(should_capture(
            FilterMode::All,
            "http://localhost/node_modules/x.js",
            false
        ));
        assert!(should_capture(FilterMode::Xhr, "http://localhost/a.png", true));
        assert!(!should_capture(FilterMode::Xhr, "http://localhost/api/x", false));
    }
}
