//! Scripted agent
//!
//! Replays a fixed list of step outcomes without touching the page. Used
//! for dry runs and as a harness in tests.

use async_trait::async_trait;
use std::collections::VecDeque;

use crate::agent::{PageAgent, StepContext, StepOutcome};
use crate::Result;

pub struct ScriptedAgent {
    script: VecDeque<StepOutcome>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<StepOutcome>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Two-step dry run that leaves the page untouched.
    pub fn dry_run() -> Self {
        Self::new(vec![
            StepOutcome::progress("Dry run: page left untouched"),
            StepOutcome::finished(
                "Dry run complete",
                true,
                "Dry run finished without interacting with the page",
            ),
        ])
    }

    fn next_outcome(&mut self) -> StepOutcome {
        self.script.pop_front().unwrap_or_else(|| {
            StepOutcome::finished("Script exhausted", true, "Scripted run complete")
        })
    }
}

#[async_trait]
impl PageAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn step(&mut self, _ctx: &StepContext<'_>) -> Result<StepOutcome> {
        Ok(self.next_outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_order() {
        let mut agent = ScriptedAgent::new(vec![
            StepOutcome::progress("one"),
            StepOutcome::progress("two"),
        ]);
        assert_eq!(agent.next_outcome().text, "one");
        assert_eq!(agent.next_outcome().text, "two");

        // Exhausted scripts end the run
        let last = agent.next_outcome();
        assert!(last.terminal);
        assert!(last.success);
    }

    #[test]
    fn test_dry_run_ends_successfully() {
        let mut agent = ScriptedAgent::dry_run();
        let first = agent.next_outcome();
        assert!(!first.terminal);

        let second = agent.next_outcome();
        assert!(second.terminal);
        assert!(second.success);
        assert!(second.conclusion.is_some());
    }
}
