//! Yield policy and the bounded retry budget
//!
//! When a plan hits a transient storage conflict, or a critical section the
//! executor may wait out, the executor yields: save, wait, revalidate,
//! restore, retry. The policy decides whether that is allowed at all and
//! how long the whole retry loop may take.
//!
//! Storage-conflict pauses start at the policy's backoff and double on each
//! retry up to `MAX_BACKOFF`, so a loop yields a bounded number of times
//! however long its budget is.

use std::cell::Cell;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::placement::{DatabaseShardingRuntime, OperationContext, ReadPlacement, ShardingResult};

/// Default upper bound on one retry loop.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(5000);

/// Default pause before the first storage-conflict retry.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1);

/// Smallest accepted backoff. A zero backoff would spin.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Longest single pause between storage-conflict retries.
pub const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// Retry rules for one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldPolicy {
    allow_retry: bool,
    max_wait: Duration,
    backoff: Duration,
}

impl Default for YieldPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WAIT, DEFAULT_BACKOFF)
    }
}

impl YieldPolicy {
    /// Retry within `max_wait`, pausing at least `backoff` before the first
    /// storage retry. Backoffs below `MIN_BACKOFF` are raised to it.
    pub fn new(max_wait: Duration, backoff: Duration) -> Self {
        Self {
            allow_retry: true,
            max_wait,
            backoff: backoff.max(MIN_BACKOFF),
        }
    }

    /// Never retry; every conflict surfaces to the caller.
    pub fn no_retry() -> Self {
        Self {
            allow_retry: false,
            max_wait: Duration::ZERO,
            backoff: Duration::ZERO,
        }
    }

    pub fn allows_retry(&self) -> bool {
        self.allow_retry
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Start the clock for one retry loop.
    pub fn start(&self) -> YieldBudget {
        YieldBudget {
            deadline: Instant::now() + self.max_wait,
            next_backoff: Cell::new(self.backoff),
        }
    }
}

/// Time left for one retry loop, and the next pause to take.
#[derive(Debug)]
pub struct YieldBudget {
    deadline: Instant,
    next_backoff: Cell<Duration>,
}

impl YieldBudget {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The pause the next `pause` call will take.
    pub fn next_backoff(&self) -> Duration {
        self.next_backoff.get()
    }

    /// Sleep the current backoff if it fits in the remaining budget, then
    /// double it. Returns false, without sleeping, when it does not fit.
    pub fn pause(&self) -> bool {
        let backoff = self.next_backoff.get();
        let remaining = self.remaining();
        if remaining.is_zero() || backoff > remaining {
            return false;
        }
        if !backoff.is_zero() {
            thread::sleep(backoff);
        }
        let grown = backoff.saturating_mul(2).min(MAX_BACKOFF.max(backoff));
        self.next_backoff.set(grown);
        true
    }
}

/// Callbacks the executor runs while yielded.
pub trait YieldHooks {
    /// Locks are released; the executor is about to wait.
    fn on_yield(&self) {}

    /// The wait is over and the plan is about to restore. A placement
    /// failure here aborts the retry.
    fn revalidate(&self) -> ShardingResult<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopYieldHooks;

impl YieldHooks for NoopYieldHooks {}

/// Re-run the database version check for an operation after each yield.
pub struct PlacementYieldHooks {
    runtime: Arc<DatabaseShardingRuntime>,
    op_ctx: Arc<dyn OperationContext + Send + Sync>,
}

impl PlacementYieldHooks {
    pub fn new(
        runtime: Arc<DatabaseShardingRuntime>,
        op_ctx: Arc<dyn OperationContext + Send + Sync>,
    ) -> Self {
        Self { runtime, op_ctx }
    }
}

impl YieldHooks for PlacementYieldHooks {
    fn revalidate(&self) -> ShardingResult<()> {
        let op_ctx: &dyn OperationContext = self.op_ctx.as_ref();
        self.runtime.acquire_shared(op_ctx)?.check_db_version(op_ctx)
    }
}
