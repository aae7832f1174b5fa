//! Migration critical section
//!
//! Three phases: Idle → CatchUp → Commit → Idle (or CatchUp → Idle on abort).
//!
//! - Writes are blocked from CatchUp onward
//! - Reads are blocked only during Commit; data is still consistent for
//!   readers while the migration catches up
//! - Every exit must present the reason the section was entered with
//! - Exiting wakes every waiter on the section's signal

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use super::context::AccessIntent;
use super::errors::{ShardingError, ShardingResult};

/// Phase of a database's critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalSectionPhase {
    Idle,
    CatchUp,
    Commit,
}

impl CriticalSectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::CatchUp => "CatchUp",
            Self::Commit => "Commit",
        }
    }
}

#[derive(Debug)]
struct SignalInner {
    released: Mutex<bool>,
    cond: Condvar,
}

/// One-shot signal that becomes ready when a critical section ends.
///
/// Clones share the same underlying state. Each entry into a critical
/// section creates a fresh signal.
#[derive(Debug, Clone)]
pub struct CriticalSectionSignal {
    inner: Arc<SignalInner>,
}

impl CriticalSectionSignal {
    fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                released: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// True once the section this signal belongs to has ended.
    pub fn is_ready(&self) -> bool {
        *self
            .inner
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the section ends.
    pub fn wait(&self) {
        let mut released = self
            .inner
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = self
                .inner
                .cond
                .wait(released)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the section ends or `timeout` elapses. Returns whether
    /// the section ended.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let released = self
            .inner
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (released, _) = self
            .inner
            .cond
            .wait_timeout_while(released, timeout, |released| !*released)
            .unwrap_or_else(PoisonError::into_inner);
        *released
    }

    /// True when both handles refer to the same section entry.
    pub fn same_section(&self, other: &CriticalSectionSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn release(&self) {
        let mut released = self
            .inner
            .released
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *released = true;
        self.inner.cond.notify_all();
    }
}

#[derive(Debug)]
enum SectionState {
    Idle,
    Active {
        phase: CriticalSectionPhase,
        reason: Value,
        signal: CriticalSectionSignal,
    },
}

/// Critical-section gate for one database.
#[derive(Debug)]
pub struct CriticalSectionController {
    db: String,
    state: SectionState,
}

impl CriticalSectionController {
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            state: SectionState::Idle,
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn phase(&self) -> CriticalSectionPhase {
        match &self.state {
            SectionState::Idle => CriticalSectionPhase::Idle,
            SectionState::Active { phase, .. } => *phase,
        }
    }

    /// Reason token of the active section.
    pub fn reason(&self) -> Option<&Value> {
        match &self.state {
            SectionState::Idle => None,
            SectionState::Active { reason, .. } => Some(reason),
        }
    }

    /// Idle → CatchUp.
    pub fn enter_catch_up(&mut self, reason: Value) -> ShardingResult<()> {
        if let SectionState::Active { phase, .. } = &self.state {
            return Err(ShardingError::CriticalSectionAlreadyActive {
                db: self.db.clone(),
                phase: phase.as_str(),
            });
        }

        self.state = SectionState::Active {
            phase: CriticalSectionPhase::CatchUp,
            reason,
            signal: CriticalSectionSignal::new(),
        };
        Ok(())
    }

    /// CatchUp → Commit. The reason must be the one given at entry.
    pub fn enter_commit(&mut self, reason: &Value) -> ShardingResult<()> {
        match &mut self.state {
            SectionState::Active {
                phase: phase @ CriticalSectionPhase::CatchUp,
                reason: entered_with,
                ..
            } => {
                if entered_with != reason {
                    return Err(ShardingError::CriticalSectionReasonMismatch {
                        db: self.db.clone(),
                    });
                }
                *phase = CriticalSectionPhase::Commit;
                Ok(())
            }
            other => Err(ShardingError::CriticalSectionWrongPhase {
                db: self.db.clone(),
                phase: match other {
                    SectionState::Idle => CriticalSectionPhase::Idle.as_str(),
                    SectionState::Active { phase, .. } => phase.as_str(),
                },
                expected: CriticalSectionPhase::CatchUp.as_str(),
            }),
        }
    }

    /// CatchUp/Commit → Idle, waking all waiters. Exiting while Idle is a
    /// no-op. On reason mismatch the state is left untouched.
    pub fn exit(&mut self, reason: &Value) -> ShardingResult<()> {
        if let SectionState::Active {
            reason: entered_with,
            ..
        } = &self.state
        {
            if entered_with != reason {
                return Err(ShardingError::CriticalSectionReasonMismatch {
                    db: self.db.clone(),
                });
            }
        }
        self.release();
        Ok(())
    }

    /// Force Idle regardless of reason. Recovery and cleanup only.
    pub fn exit_no_checks(&mut self) {
        self.release();
    }

    /// Signal to wait on if the active phase blocks `intent`.
    pub fn signal(&self, intent: AccessIntent) -> Option<CriticalSectionSignal> {
        match (&self.state, intent) {
            (SectionState::Idle, _) => None,
            (SectionState::Active { signal, .. }, AccessIntent::Write) => Some(signal.clone()),
            (
                SectionState::Active {
                    phase: CriticalSectionPhase::Commit,
                    signal,
                    ..
                },
                AccessIntent::Read,
            ) => Some(signal.clone()),
            (SectionState::Active { .. }, AccessIntent::Read) => None,
        }
    }

    fn release(&mut self) {
        if let SectionState::Active { signal, .. } =
            std::mem::replace(&mut self.state, SectionState::Idle)
        {
            signal.release();
        }
    }
}
