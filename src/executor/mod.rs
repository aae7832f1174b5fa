//! Resumable plan execution
//!
//! A `PlanExecutor` pulls results from a plan tree and survives yields:
//!
//! 1. `save_state` before the caller releases locks
//! 2. optionally `detach_from_operation_context` / `reattach_to_operation_context`
//! 3. `restore_state` once locks are held again
//! 4. `dispose` when done
//!
//! The executor knows placement only through `StageError::Placement` and
//! the `YieldHooks` it is given.

mod errors;
mod lifecycle;
mod plan;
mod state;
mod yield_policy;

pub use errors::{ExecutorError, ExecutorErrorCode, ExecutorResult, Severity};
pub use lifecycle::{ExecOutcome, PlanExecutor, ShardingYieldState};
pub use plan::{
    LockPolicy, OperationId, PlanStage, RestoreContext, ResumeToken, StageError, StageOutcome,
};
pub use state::{ExecutorStatus, LifecycleState};
pub use yield_policy::{
    NoopYieldHooks, PlacementYieldHooks, YieldBudget, YieldHooks, YieldPolicy, DEFAULT_BACKOFF,
    DEFAULT_MAX_WAIT, MAX_BACKOFF, MIN_BACKOFF,
};
