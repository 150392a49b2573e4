//! Executor state machine
//!
//! ```text
//! Idle ──execute──▶ Running ──done──▶ Idle
//!                      │
//!                      └──fatal error──▶ Faulted ──execute──▶ Running
//!                                          (unless the connection was lost)
//!
//! (Idle | Faulted) ──shutdown──▶ ShutDown
//! ```
//!
//! `ShutDown` is terminal. A `Faulted` engine whose connection was lost
//! refuses new runs until it is rebuilt.

use std::fmt;

use thiserror::Error;

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineState {
    /// Ready for a run
    #[default]
    Idle,
    /// A run is in progress
    Running,
    /// The last run ended on a fatal error
    Faulted,
    /// Channels zeroed and connection released (terminal)
    ShutDown,
}

impl EngineState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ShutDown)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Faulted => "faulted",
            Self::ShutDown => "shut down",
        }
    }

    /// Whether `self -> to` is a legal transition
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle | Self::Faulted, Self::Running)
                | (Self::Running, Self::Idle | Self::Faulted)
                | (Self::Idle | Self::Faulted, Self::ShutDown)
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Illegal state transition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Cannot go from {from} to {to}")]
pub struct StateTransitionError {
    pub from: EngineState,
    pub to: EngineState,
}

/// Current state plus the transition rules.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    state: EngineState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> EngineState {
        self.state
    }

    pub fn transition_to(&mut self, to: EngineState) -> Result<(), StateTransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(StateTransitionError {
                from: self.state,
                to,
            });
        }
        tracing::debug!("Engine state: {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Set the state without checking the transition.
    ///
    /// Only for recovering a lock poisoned while `Running`.
    pub fn force(&mut self, to: EngineState) {
        tracing::warn!("Forcing engine state {} -> {}", self.state, to);
        self.state = to;
    }
}
