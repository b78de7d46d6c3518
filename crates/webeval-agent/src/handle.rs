//! Agent run control
//!
//! The dashboard flips pause/stop flags through this handle while the
//! runner waits on them between steps. Every change is broadcast to the
//! dashboard as an `agent_state` message.

use std::sync::Arc;
use tokio::sync::watch;

use webeval_core::{ControlAction, LogKind};
use webeval_relay::Relay;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ControlState {
    paused: bool,
    stopped: bool,
}

/// Shared control handle for one agent run
///
/// Cheap to clone; all clones act on the same run.
#[derive(Clone)]
pub struct AgentHandle {
    state: Arc<watch::Sender<ControlState>>,
    relay: Relay,
}

impl AgentHandle {
    pub fn new(relay: Relay) -> Self {
        let (tx, _) = watch::channel(ControlState::default());
        Self {
            state: Arc::new(tx),
            relay,
        }
    }

    /// Pause the run at the next step boundary.
    pub fn pause(&self) {
        self.set(|s| s.paused = true);
    }

    /// Resume a paused run.
    pub fn resume(&self) {
        self.set(|s| s.paused = false);
    }

    /// Stop the run at the next step boundary. Stops are sticky.
    pub fn stop(&self) {
        self.set(|s| s.stopped = true);
    }

    /// Apply a dashboard control action.
    pub fn apply(&self, action: ControlAction) {
        self.relay.log(
            LogKind::Status,
            format!("Agent control: {}", action.as_str()),
        );
        match action {
            ControlAction::Pause => self.pause(),
            ControlAction::Resume => self.resume(),
            ControlAction::Stop => self.stop(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state.borrow().stopped
    }

    /// Broadcast the current control state to the dashboard.
    pub fn announce(&self) {
        let s = *self.state.borrow();
        self.relay.agent_state(s.paused, s.stopped);
    }

    fn set(&self, f: impl FnOnce(&mut ControlState)) {
        self.state.send_modify(f);
        self.announce();
    }

    /// Wait until the next step may run. Returns false when stopped.
    ///
    /// Pause and stop only take effect at step boundaries; a step that is
    /// already executing always finishes first.
    pub async fn wait_until_runnable(&self) -> bool {
        let mut rx = self.state.subscribe();
        loop {
            let s = *rx.borrow_and_update();
            if s.stopped {
                return false;
            }
            if !s.paused {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}
