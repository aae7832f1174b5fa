//! Executor lifecycle state
//!
//! Four states plus one sticky overlay:
//!
//! ```text
//!   Active <--save/restore--> Saved <--detach/reattach--> Detached
//!      \                        |                           /
//!       `---------------------> Disposed <-----------------'
//! ```
//!
//! - Only Active produces results
//! - Disposed is terminal
//! - The kill flag is set at most once and never cleared; it does not
//!   change the lifecycle state

use super::errors::{ExecutorError, ExecutorResult};

/// Lifecycle state of a plan executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Saved,
    Detached,
    Disposed,
}

impl LifecycleState {
    /// Get the state name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Saved => "Saved",
            Self::Detached => "Detached",
            Self::Disposed => "Disposed",
        }
    }

    /// Active → Saved
    pub fn save(self) -> ExecutorResult<Self> {
        match self {
            Self::Active => Ok(Self::Saved),
            _ => Err(self.forbidden("save_state")),
        }
    }

    /// Saved → Active
    pub fn restore(self) -> ExecutorResult<Self> {
        match self {
            Self::Saved => Ok(Self::Active),
            _ => Err(self.forbidden("restore_state")),
        }
    }

    /// Saved → Detached
    pub fn detach(self) -> ExecutorResult<Self> {
        match self {
            Self::Saved => Ok(Self::Detached),
            _ => Err(self.forbidden("detach_from_operation_context")),
        }
    }

    /// Detached → Saved
    pub fn reattach(self) -> ExecutorResult<Self> {
        match self {
            Self::Detached => Ok(Self::Saved),
            _ => Err(self.forbidden("reattach_to_operation_context")),
        }
    }

    /// Any → Disposed
    pub fn dispose(self) -> Self {
        Self::Disposed
    }

    pub fn can_produce(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Results may be buffered while Active or Saved.
    pub fn can_stash(&self) -> bool {
        matches!(self, Self::Active | Self::Saved)
    }

    fn forbidden(&self, operation: &str) -> ExecutorError {
        match self {
            Self::Disposed => ExecutorError::disposed(operation),
            _ => ExecutorError::illegal_transition(operation, self.state_name()),
        }
    }
}

/// Lifecycle state with the kill overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStatus {
    state: LifecycleState,
    kill_reason: Option<String>,
}

impl Default for ExecutorStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorStatus {
    /// A fresh executor starts Active and not killed.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Active,
            kill_reason: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_killed(&self) -> bool {
        self.kill_reason.is_some()
    }

    pub fn kill_reason(&self) -> Option<&str> {
        self.kill_reason.as_deref()
    }

    /// Set the kill reason unless one is already set. Returns whether this
    /// call won.
    pub fn mark_killed(&mut self, reason: impl Into<String>) -> bool {
        if self.kill_reason.is_some() {
            return false;
        }
        self.kill_reason = Some(reason.into());
        true
    }

    /// Gate for result production and restore: disposed first, then
    /// killed. Lifecycle legality is left to the transition itself.
    pub fn check_live(&self, operation: &str) -> ExecutorResult<()> {
        if self.state == LifecycleState::Disposed {
            return Err(ExecutorError::disposed(operation));
        }
        match &self.kill_reason {
            Some(reason) => Err(ExecutorError::killed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Any → Disposed. The kill reason is kept.
    pub fn dispose(&mut self) {
        self.state = self.state.dispose();
    }

    /// Apply a lifecycle transition; on failure the state is unchanged.
    pub fn apply(
        &mut self,
        transition: impl FnOnce(LifecycleState) -> ExecutorResult<LifecycleState>,
    ) -> ExecutorResult<()> {
        self.state = transition(self.state)?;
        Ok(())
    }
}
