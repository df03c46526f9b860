//! Supervisor lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the worker pool.
///
/// ```text
/// Empty -> Provisioning -> Running <-> Degraded
///               |             |           |
///               +-------------+-----------+--> ShuttingDown -> Empty
/// ```
///
/// Provisioning may also land directly in Degraded when not every worker
/// came up healthy in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No workers, no metrics directory owned.
    Empty,
    /// Metrics directory reset, workers being spawned.
    Provisioning,
    /// Every worker alive and passing its liveness probe.
    Running,
    /// At least one worker exited or failed its probe; respawn attempted.
    Degraded,
    /// Workers are being signalled and reaped.
    ShuttingDown,
}

impl SupervisorState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Empty, Provisioning)
                | (Provisioning, Running)
                | (Provisioning, Degraded)
                | (Provisioning, ShuttingDown)
                | (Running, Degraded)
                | (Degraded, Running)
                | (Running, ShuttingDown)
                | (Degraded, ShuttingDown)
                | (ShuttingDown, Empty)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Empty => "empty",
            SupervisorState::Provisioning => "provisioning",
            SupervisorState::Running => "running",
            SupervisorState::Degraded => "degraded",
            SupervisorState::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid supervisor transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SupervisorState,
    pub to: SupervisorState,
}

/// Holder of the current state that only accepts valid transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SupervisorState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Empty,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Move to `next`, or leave the state untouched and fail.
    pub fn transition(&mut self, next: SupervisorState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::info!(from = %self.state, to = %next, "Supervisor state change");
        self.state = next;
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use SupervisorState::*;

    const ALL: [SupervisorState; 5] = [Empty, Provisioning, Running, Degraded, ShuttingDown];

    #[test]
    fn test_full_lifecycle() {
        let mut machine = StateMachine::new();
        for next in [Provisioning, Running, Degraded, Running, ShuttingDown, Empty] {
            machine.transition(next).unwrap();
        }
        assert_eq!(machine.state(), Empty);
    }

    #[test]
    fn test_invalid_transition_is_rejected_and_state_kept() {
        let mut machine = StateMachine::new();
        let err = machine.transition(Running).unwrap_err();
        assert_eq!(err, InvalidTransition { from: Empty, to: Running });
        assert_eq!(machine.state(), Empty);
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{} -> {}", state, state);
        }
    }

    #[test]
    fn test_directory_reset_only_reachable_from_empty() {
        for state in ALL {
            assert_eq!(state.can_transition_to(Provisioning), state == Empty);
        }
    }

    proptest! {
        /// Every walk of valid transitions ends in a state that can still shut down or is Empty.
        #[test]
        fn prop_every_state_can_reach_empty(steps in prop::collection::vec(0usize..5, 0..20)) {
            let mut machine = StateMachine::new();
            for step in steps {
                let _ = machine.transition(ALL[step]);
            }
            let state = machine.state();
            prop_assert!(
                state == Empty
                    || state.can_transition_to(ShuttingDown)
                    || state == ShuttingDown
            );
        }
    }
}
