//! # Broker Lifecycle
//!
//! `Uninitialized → Configured → Running → Stopped`
//!
//! `Running → Configured` is only taken when `listen` aborts during startup
//! (schema resolution or subscription failure), so a later `listen` may try
//! again. `Stopped` is terminal.

use serde::{Deserialize, Serialize};

use super::errors::LifecycleError;

/// Router/broker state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrokerState {
    /// Builder has not produced a broker yet.
    #[default]
    Uninitialized,
    /// Capabilities wired, not dispatching.
    Configured,
    /// `listen` owns the dispatch loop.
    Running,
    /// Torn down. Terminal.
    Stopped,
}

impl BrokerState {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: BrokerState) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Configured)
                | (Self::Configured, Self::Running)
                | (Self::Running, Self::Configured)
                | (Self::Running, Self::Stopped)
        )
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Move to `next`, or report the invalid transition.
    pub fn transition(&mut self, next: BrokerState) -> Result<(), LifecycleError> {
        if !self.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}
