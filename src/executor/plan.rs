//! Plan tree contract
//!
//! The storage engine's plan tree, seen from the executor. A stage produces
//! one unit of work per call and supports saving and restoring its cursors
//! around yields.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::placement::ShardingError;

/// Result of one unit of plan work.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// A result is ready.
    Advanced(T),
    /// Work was done but nothing is ready yet; call again.
    NeedTime,
    /// The plan is exhausted.
    EndOfData,
}

/// Failures a plan stage can report.
///
/// Storage conflicts and placement failures are kept apart: a stale
/// placement is never retried as if it were a storage conflict.
#[derive(Debug, Clone)]
pub enum StageError {
    /// Transient storage-engine conflict. Retrying after a yield may succeed.
    WriteConflict,
    /// The plan checked placement and was rejected.
    Placement(ShardingError),
    /// Data the plan depended on is gone (dropped, renamed).
    DataGone(String),
    /// Any other failure.
    Failed(String),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::WriteConflict => write!(f, "write conflict"),
            StageError::Placement(err) => write!(f, "{}", err),
            StageError::DataGone(msg) => write!(f, "data gone: {}", msg),
            StageError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<ShardingError> for StageError {
    fn from(err: ShardingError) -> Self {
        StageError::Placement(err)
    }
}

/// Identifies the operation an executor is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context handed to a stage when it restores after a yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreContext {
    op_id: OperationId,
}

impl RestoreContext {
    pub fn new(op_id: OperationId) -> Self {
        Self { op_id }
    }

    pub fn op_id(&self) -> OperationId {
        self.op_id
    }
}

/// Opaque position from which a resumable scan can continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Value);

impl ResumeToken {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// Who acquires storage locks for the executor.
///
/// Descriptive only: the executor records it for its owner, which reads it
/// back through `PlanExecutor::lock_policy` to decide whether to take locks
/// around each call. The executor itself never takes or releases locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// The caller holds the locks; the executor never takes them itself.
    #[default]
    LockExternally,
    /// Locks are taken per call on the executor's behalf by its owner.
    LocksInternally,
}

/// A plan tree root.
pub trait PlanStage {
    type Item;

    /// Do one unit of work.
    fn work(&mut self) -> Result<StageOutcome<Self::Item>, StageError>;

    /// Prepare for the caller to release locks.
    fn save_state(&mut self);

    /// Re-establish cursors after a yield.
    fn restore_state(&mut self, ctx: &RestoreContext) -> Result<(), StageError>;

    /// Release engine-level resources while keeping the logical position.
    fn detach(&mut self) {}

    /// Reacquire engine-level resources for `op_id`.
    fn reattach(&mut self, _op_id: OperationId) {}

    /// Release everything.
    fn dispose(&mut self) {}

    /// True once no further results can be produced.
    fn is_eof(&self) -> bool;

    /// Position after the last produced result, for resumable scans.
    fn resume_token(&self) -> Option<ResumeToken> {
        None
    }
}
