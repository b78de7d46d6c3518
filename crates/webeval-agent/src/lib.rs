//! webeval-agent: agent contract and step loop
//!
//! Defines the black-box [`PageAgent`] contract, the [`AgentHandle`] the
//! dashboard uses to pause, resume and stop a run, and the [`AgentRunner`]
//! that drives an agent step by step while relaying narration.

pub mod agent;
pub mod error;
pub mod handle;
pub mod probe;
pub mod prompt;
pub mod runner;
pub mod scripted;

pub use agent::{PageAgent, StepContext, StepOutcome};
pub use error::{AgentError, Result};
pub use handle::AgentHandle;
pub use probe::ProbeAgent;
pub use runner::{AgentRunResult, AgentRunner, StepRecord};
pub use scripted::ScriptedAgent;

use webeval_core::config::AgentConfig;
use webeval_core::AgentKind;

/// Build the configured built-in agent.
pub fn build_agent(config: &AgentConfig) -> Box<dyn PageAgent> {
    match config.kind {
        AgentKind::Probe => Box::new(ProbeAgent::new()),
        AgentKind::Scripted => Box::new(ScriptedAgent::dry_run()),
    }
}
