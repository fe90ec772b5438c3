//! Session lifecycle state machine

use std::fmt;

/// Where a single-shot pipeline is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Idle,
    Registering,
    Capturing,
    Terminating,
    Closed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Registering => "registering",
            PipelineState::Capturing => "capturing",
            PipelineState::Terminating => "terminating",
            PipelineState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl PipelineState {
    /// Forward-only: each state may move to its successor, and any state may
    /// fail straight to `Closed`. Nothing is revisited.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Registering)
                | (Registering, Capturing)
                | (Capturing, Terminating)
                | (Terminating, Closed)
                | (Idle | Registering | Capturing, Closed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pipeline transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Tracks and logs the lifecycle of one pipeline run
#[derive(Debug)]
pub struct Lifecycle {
    state: PipelineState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("Pipeline {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Error path: jump to `Closed` from wherever we are
    pub fn fail(&mut self) {
        if self.state != PipelineState::Closed {
            tracing::debug!("Pipeline {} -> {} (failed)", self.state, PipelineState::Closed);
            self.state = PipelineState::Closed;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
