//! MCP tool handlers.
//!
//! Every failure surfaces as text inside a successful tool result; the
//! caller always receives a report that discloses what went wrong rather
//! than a protocol-level error.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use webeval_agent::prompt::ux_evaluation_prompt;
use webeval_agent::{build_agent, AgentHandle, AgentRunResult, AgentRunner};
use webeval_browser::SessionManager;
use webeval_report::{format_report, AgentResultPayload};

/// Arguments for the `web_eval_agent` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EvaluateArgs {
    /// URL of the running web application, including the port,
    /// e.g. http://localhost:5173. Prefer the root URL over deep paths.
    pub url: String,
    /// The UX/UI flow to exercise, in natural language. Be specific:
    /// "test the checkout flow", "check form validation feedback".
    pub task: String,
    /// Run the evaluation browser headless. Defaults to the configured
    /// value when omitted.
    pub headless: Option<bool>,
}

/// Arguments for the `setup_browser_state` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetupStateArgs {
    /// URL to open for signing in; defaults to the configured app URL.
    pub url: Option<String>,
}

const SERVER_INSTRUCTIONS: &str = "Browser-based UX evaluation for locally running web applications.\n\n\
Use web_eval_agent to test a specific flow: pass the app's localhost URL (root URL including the port) \
and a detailed natural-language task. The tool drives a real browser against the app, mirrors the run to \
the dashboard for live viewing and intervention, and returns a report covering agent steps, console \
errors, failed network requests, full console and network logs, a chronological timeline, and screenshots.\n\n\
Use setup_browser_state only when the user explicitly asks to set up authentication: it opens a visible \
browser for the user to sign in and saves cookies and local storage for later evaluations.";

/// The tool surface served over MCP.
#[derive(Clone)]
pub struct EvalService {
    session: Arc<SessionManager>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl EvalService {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Evaluate the user experience of a web application by driving a real browser through a specific task. The application must already be running at the given URL. Returns a step-by-step report with console logs, network requests, a chronological timeline and screenshots."
    )]
    async fn web_eval_agent(
        &self,
        Parameters(args): Parameters<EvaluateArgs>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(error) = validate_evaluate_args(&args) {
            return Ok(CallToolResult::success(vec![Content::text(error)]));
        }
        let url = args.url.trim().to_string();
        let task = args.task.trim().to_string();
        let headless = args
            .headless
            .unwrap_or(self.session.config().browser.headless);

        info!("web_eval_agent: url={} headless={}", url, headless);
        let (report, screenshots) = self.run_evaluation(&url, &task, headless).await;

        let mut contents = vec![Content::text(report)];
        for shot in screenshots {
            contents.push(Content::image(shot, "image/png".to_string()));
        }
        Ok(CallToolResult::success(contents))
    }

    #[tool(
        description = "Open a visible browser so the user can sign in to the application, then save cookies and local storage for later evaluations. Only call this when the user explicitly asks to set up browser state or authentication."
    )]
    async fn setup_browser_state(
        &self,
        Parameters(args): Parameters<SetupStateArgs>,
    ) -> Result<CallToolResult, McpError> {
        let url = args
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        info!("setup_browser_state: url={:?}", url);
        let text = match self.session.setup_state(url).await {
            Ok(message) => message,
            Err(e) => {
                warn!("Browser state setup failed: {}", e);
                format!("Error: browser state setup failed: {e}")
            }
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

impl EvalService {
    /// Open a session, run the agent, format the report, and close.
    ///
    /// The session is closed on every path once opening was attempted,
    /// so a failed run never leaks a browser.
    async fn run_evaluation(&self, url: &str, task: &str, headless: bool) -> (String, Vec<String>) {
        if let Err(e) = self.session.open_session(url, headless).await {
            warn!("Failed to open {}: {}", url, e);
            let failed = AgentRunResult {
                error: Some(format!("failed to open {url}: {e}")),
                ..Default::default()
            };
            let report =
                format_report(&AgentResultPayload::Structured(failed), url, task, &[], &[]);
            self.session.close().await;
            return (report, Vec::new());
        }

        let result = match self.session.page() {
            Some(page) => {
                let prompt = ux_evaluation_prompt(url, task);
                let handle = AgentHandle::new(self.session.relay().clone());
                let control = handle.clone();
                self.session
                    .set_control_handler(move |action| control.apply(action));

                let mut agent = build_agent(&self.session.config().agent);
                let runner = AgentRunner::new(
                    self.session.config().agent.clone(),
                    self.session.relay().clone(),
                );
                let result = runner.run(agent.as_mut(), &page, &prompt, &handle).await;
                self.session.clear_control_handler();
                result
            }
            None => AgentRunResult {
                error: Some("no page available after opening the session".to_string()),
                ..Default::default()
            },
        };

        let console = self.session.buffers().console_snapshot();
        let network = self.session.buffers().network_snapshot();
        let screenshots: Vec<String> = result
            .steps
            .iter()
            .filter_map(|s| s.screenshot.clone())
            .collect();

        let report = format_report(
            &AgentResultPayload::Structured(result),
            url,
            task,
            &console,
            &network,
        );

        self.session.close().await;
        (report, screenshots)
    }
}

#[tool_handler]
impl ServerHandler for EvalService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Argument validation, reported as user-facing text.
fn validate_evaluate_args(args: &EvaluateArgs) -> Option<String> {
    let url_empty = args.url.trim().is_empty();
    let task_empty = args.task.trim().is_empty();
    if url_empty && task_empty {
        return Some(
            "Error: Both 'url' and 'task' parameters are required. Please provide a URL to \
             evaluate and a specific UX/UI task to test."
                .to_string(),
        );
    }
    if url_empty {
        return Some(
            "Error: 'url' must be a non-empty string containing the web application URL to \
             evaluate."
                .to_string(),
        );
    }
    if task_empty {
        return Some(
            "Error: 'task' must be a non-empty string describing the UX/UI aspect to test."
                .to_string(),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use webeval_core::Config;
    use webeval_relay::Relay;

    fn args(url: &str, task: &str) -> EvaluateArgs {
        EvaluateArgs {
            url: url.to_string(),
            task: task.to_string(),
            headless: None,
        }
    }

    #[test]
    fn test_validation_messages() {
        assert!(validate_evaluate_args(&args("", ""))
            .unwrap()
            .contains("Both 'url' and 'task'"));
        assert!(validate_evaluate_args(&args("", "check nav"))
            .unwrap()
            .contains("'url' must be a non-empty string"));
        assert!(validate_evaluate_args(&args("http://localhost:5173", "   "))
            .unwrap()
            .contains("'task' must be a non-empty string"));
        assert!(validate_evaluate_args(&args("http://localhost:5173", "check nav")).is_none());
    }

    #[test]
    fn test_evaluate_args_deserialize() {
        let args: EvaluateArgs = serde_json::from_str(
            r#"{"url":"http://localhost:3000","task":"check the nav"}"#,
        )
        .unwrap();
        assert_eq!(args.url, "http://localhost:3000");
        assert!(args.headless.is_none());

        let args: EvaluateArgs = serde_json::from_str(
            r#"{"url":"http://localhost:3000","task":"t","headless":false}"#,
        )
        .unwrap();
        assert_eq!(args.headless, Some(false));
    }

    #[test]
    fn test_setup_args_url_optional() {
        let args: SetupStateArgs = serde_json::from_str("{}").unwrap();
        assert!(args.url.is_none());
    }

    #[test]
    fn test_server_info_advertises_tools() {
        let config = Config::default();
        let relay = Relay::new(config.relay.clone());
        let service = EvalService::new(Arc::new(SessionManager::new(config, relay)));
        let info = service.get_info();
        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("web_eval_agent"));
        assert!(instructions.contains("setup_browser_state"));
    }
}
