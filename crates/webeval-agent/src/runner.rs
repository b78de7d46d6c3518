//! Agent step loop
//!
//! Drives a [`PageAgent`](crate::PageAgent) one step at a time, honoring
//! dashboard pause/stop at step boundaries and relaying step narration to
//! the dashboard log stream.

use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::Page;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use webeval_core::config::AgentConfig;
use webeval_core::LogKind;
use webeval_relay::Relay;

use crate::agent::{PageAgent, StepContext};
use crate::handle::AgentHandle;

/// Record of one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based step number
    pub index: usize,
    /// Agent narration for the step
    pub text: String,
    /// Page URL after the step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Step-level error reported by the agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Base64 PNG captured after the step, when enabled
    #[serde(skip)]
    pub screenshot: Option<String>,
}

/// Final result of an agent run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub steps: Vec<StepRecord>,

    /// Agent verdict from the terminal step
    pub success: bool,

    /// Final conclusion from the terminal step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,

    /// Infrastructure error that ended the run early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// True when the run was stopped from the dashboard
    pub stopped: bool,
}

/// Drives one agent through its task
pub struct AgentRunner {
    config: AgentConfig,
    relay: Relay,
}

impl AgentRunner {
    pub fn new(config: AgentConfig, relay: Relay) -> Self {
        Self { config, relay }
    }

    /// Run the agent until it finishes, errors, is stopped, or hits the
    /// step limit.
    ///
    /// The control handle must be created (and wired into input routing)
    /// before this is called; the runner never creates its own.
    pub async fn run(
        &self,
        agent: &mut dyn PageAgent,
        page: &Page,
        task: &str,
        handle: &AgentHandle,
    ) -> AgentRunResult {
        let mut result = AgentRunResult::default();
        let mut finished = false;

        handle.announce();
        info!(
            "Agent '{}' starting, max {} steps",
            agent.name(),
            self.config.max_steps
        );
        self.relay
            .log(LogKind::Status, format!("Agent {} started", agent.name()));

        for index in 1..=self.config.max_steps {
            if !handle.wait_until_runnable().await {
                info!("Agent run stopped at step {}", index);
                self.relay
                    .log(LogKind::Status, "Agent run stopped from the dashboard");
                result.stopped = true;
                break;
            }

            let ctx = StepContext { page, task, step: index };
            let outcome = match agent.step(&ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Agent step {} failed: {}", index, e);
                    self.relay.log(
                        LogKind::Status,
                        format!("Agent step {} failed: {}", index, e),
                    );
                    result.error = Some(e.to_string());
                    break;
                }
            };

            let url = page.url().await.ok().flatten();

            self.relay.log(LogKind::Agent, format!("Step {}", index));
            if let Some(u) = &url {
                self.relay.log(LogKind::Agent, format!("URL: {}", u));
            }
            if !outcome.text.is_empty() {
                self.relay
                    .log(LogKind::Agent, format!("Agent Output: {}", outcome.text));
            }
            if let Some(e) = &outcome.error {
                self.relay
                    .log(LogKind::Status, format!("Step {} error: {}", index, e));
            }

            let screenshot = if self.config.step_screenshots {
                capture_screenshot(page).await
            } else {
                None
            };

            result.steps.push(StepRecord {
                index,
                text: outcome.text,
                url,
                error: outcome.error,
                timestamp: Utc::now(),
                screenshot,
            });

            if outcome.terminal {
                result.success = outcome.success;
                result.conclusion = outcome.conclusion;
                finished = true;
                break;
            }
        }

        if !finished && !result.stopped && result.error.is_none() {
            self.relay.log(
                LogKind::Status,
                format!("Agent reached the {} step limit", self.config.max_steps),
            );
        }

        info!(
            "Agent run complete: {} steps, success={}",
            result.steps.len(),
            result.success
        );
        self.relay.log(
            LogKind::Status,
            format!("Agent {} finished, success={}", agent.name(), result.success),
        );

        result
    }
}

/// Capture the page as base64 PNG, best effort.
async fn capture_screenshot(page: &Page) -> Option<String> {
    let params = CaptureScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .build();
    match page.execute(params).await {
        Ok(resp) => {
            let data: &str = resp.data.as_ref();
            Some(data.to_string())
        }
        Err(e) => {
            debug!("Step screenshot failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_result_default() {
        let result = AgentRunResult::default();
        assert!(result.steps.is_empty());
        assert!(!result.success);
        assert!(!result.stopped);
        assert!(result.conclusion.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_step_record_serialization_skips_screenshot() {
        let record = StepRecord {
            index: 1,
            text: "clicked the button".to_string(),
            url: Some("http://localhost:5173/".to_string()),
            error: None,
            timestamp: Utc::now(),
            screenshot: Some("aGVsbG8=".to_string()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("clicked the button"));
        assert!(!json.contains("aGVsbG8="));
    }
}
