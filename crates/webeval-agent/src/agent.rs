//! Page agent contract
//!
//! Agents are black boxes to the rest of the system: the runner owns
//! stepping, control flow and reporting, the agent owns what a single
//! step does on the live page.

use async_trait::async_trait;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Context handed to an agent for one step
pub struct StepContext<'a> {
    /// Live page the agent acts on
    pub page: &'a Page,
    /// Task description for the whole run
    pub task: &'a str,
    /// 1-based step number
    pub step: usize,
}

/// Outcome of a single agent step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Narration for the log stream
    pub text: String,

    /// Error the agent hit during this step, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// True when the agent considers the run finished
    pub terminal: bool,

    /// Whether the task succeeded, meaningful on the terminal step
    pub success: bool,

    /// Final verdict, present on the terminal step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

impl StepOutcome {
    /// A non-terminal step that only narrates progress.
    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// The terminal step, ending the run with a verdict.
    pub fn finished(
        text: impl Into<String>,
        success: bool,
        conclusion: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            terminal: true,
            success,
            conclusion: Some(conclusion.into()),
            ..Default::default()
        }
    }

    /// Attach a step-level error without ending the run.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A task-driven agent operating on a live page
#[async_trait]
pub trait PageAgent: Send {
    /// Agent name for logs
    fn name(&self) -> &str;

    /// Execute one step of the task.
    async fn step(&mut self, ctx: &StepContext<'_>) -> Result<StepOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_outcome() {
        let outcome = StepOutcome::progress("looking around");
        assert_eq!(outcome.text, "looking around");
        assert!(!outcome.terminal);
        assert!(!outcome.success);
        assert!(outcome.conclusion.is_none());
    }

    #[test]
    fn test_finished_outcome() {
        let outcome = StepOutcome::finished("done", true, "everything works");
        assert!(outcome.terminal);
        assert!(outcome.success);
        assert_eq!(outcome.conclusion.as_deref(), Some("everything works"));
    }

    #[test]
    fn test_with_error() {
        let outcome = StepOutcome::progress("clicked").with_error("nothing happened");
        assert_eq!(outcome.error.as_deref(), Some("nothing happened"));
        assert!(!outcome.terminal);
    }
}
