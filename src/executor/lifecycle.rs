//! Plan executor lifecycle
//!
//! Drives one plan tree through produce, yield, resume and teardown.
//!
//! Checkpoints at the start of `produce_next`, `restore_state`, `save_state`
//! and `stash`, in order:
//! 1. Disposed → `EXECUTOR_DISPOSED`
//! 2. Killed → `EXECUTOR_KILLED` with the stored reason, plan untouched
//! 3. Wrong lifecycle state → `EXECUTOR_ILLEGAL_TRANSITION` (fatal)
//!
//! Retry rules inside `produce_next` and `restore_state`:
//! - Storage write conflicts are retried after a backoff when the policy
//!   allows it
//! - A critical section reported by the plan is waited out when the policy
//!   allows it and it ends within the budget
//! - A required metadata refresh is never retried here; the executor is
//!   killed and the owner refreshes
//! - Running out of budget leaves the executor Saved and returns
//!   `EXECUTOR_TIME_BUDGET_EXCEEDED`, not killed
//! - Every other plan failure kills the executor

use std::sync::Arc;

use uuid::Uuid;

use super::errors::{ExecutorError, ExecutorResult};
use super::plan::{
    LockPolicy, OperationId, PlanStage, RestoreContext, ResumeToken, StageError, StageOutcome,
};
use super::state::{ExecutorStatus, LifecycleState};
use super::yield_policy::{NoopYieldHooks, YieldBudget, YieldHooks, YieldPolicy};
use crate::observability::{log_event, log_event_at, Event, MetricsRegistry, Severity};
use crate::placement::{CriticalSectionSignal, ShardingError};

/// Result of `produce_next`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome<T> {
    Advanced(T),
    EndOfData,
}

impl<T> ExecOutcome<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            ExecOutcome::Advanced(item) => Some(item),
            ExecOutcome::EndOfData => None,
        }
    }
}

/// Placement condition recorded when the executor stopped because of it.
///
/// The owner waits on the signal or refreshes the database, then retries
/// the operation.
#[derive(Debug, Clone)]
pub struct ShardingYieldState {
    critical_section_signal: Option<CriticalSectionSignal>,
    refresh_required: Option<String>,
}

impl ShardingYieldState {
    fn from_error(err: &ShardingError) -> Option<Self> {
        let info = err.stale_info()?;
        Some(match &info.critical_section_signal {
            Some(signal) => Self {
                critical_section_signal: Some(signal.clone()),
                refresh_required: None,
            },
            None => Self {
                critical_section_signal: None,
                refresh_required: Some(info.db.clone()),
            },
        })
    }

    /// Signal to wait on before retrying.
    pub fn critical_section_signal(&self) -> Option<&CriticalSectionSignal> {
        self.critical_section_signal.as_ref()
    }

    /// Database whose metadata must be refreshed before retrying.
    pub fn refresh_required(&self) -> Option<&str> {
        self.refresh_required.as_deref()
    }
}

/// A resumable execution over one plan tree.
pub struct PlanExecutor<P: PlanStage> {
    id: Uuid,
    plan: P,
    status: ExecutorStatus,
    /// LIFO; consulted before the plan.
    stash: Vec<P::Item>,
    op_id: OperationId,
    policy: YieldPolicy,
    lock_policy: LockPolicy,
    hooks: Box<dyn YieldHooks>,
    sharding_yield: Option<ShardingYieldState>,
    post_batch_resume_token: Option<ResumeToken>,
    metrics: Arc<MetricsRegistry>,
}

impl<P: PlanStage> PlanExecutor<P> {
    /// Wrap `plan`, attached to `op_id`. Starts Active.
    pub fn new(plan: P, op_id: OperationId, policy: YieldPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan,
            status: ExecutorStatus::new(),
            stash: Vec::new(),
            op_id,
            policy,
            lock_policy: LockPolicy::default(),
            hooks: Box::new(NoopYieldHooks),
            sharding_yield: None,
            post_batch_resume_token: None,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_hooks(mut self, hooks: Box<dyn YieldHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_lock_policy(mut self, lock_policy: LockPolicy) -> Self {
        self.lock_policy = lock_policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.status.state()
    }

    pub fn is_killed(&self) -> bool {
        self.status.is_killed()
    }

    pub fn kill_reason(&self) -> Option<&str> {
        self.status.kill_reason()
    }

    pub fn is_disposed(&self) -> bool {
        self.status.state() == LifecycleState::Disposed
    }

    pub fn op_id(&self) -> OperationId {
        self.op_id
    }

    pub fn yield_policy(&self) -> &YieldPolicy {
        &self.policy
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    pub fn plan(&self) -> &P {
        &self.plan
    }

    pub fn stashed_len(&self) -> usize {
        self.stash.len()
    }

    /// Placement condition that stopped the last call, if any.
    pub fn sharding_yield_state(&self) -> Option<&ShardingYieldState> {
        self.sharding_yield.as_ref()
    }

    pub fn take_sharding_yield_state(&mut self) -> Option<ShardingYieldState> {
        self.sharding_yield.take()
    }

    /// Resume position after the last produced result.
    pub fn post_batch_resume_token(&self) -> Option<&ResumeToken> {
        self.post_batch_resume_token.as_ref()
    }

    /// True when no more results will come: killed, or nothing stashed and
    /// the plan is exhausted.
    pub fn is_eof(&self) -> bool {
        self.status.is_killed() || (self.stash.is_empty() && self.plan.is_eof())
    }

    // =========================================================================
    // RESULT PRODUCTION
    // =========================================================================

    /// Next result: stashed results first, most recent first, then the plan.
    pub fn produce_next(&mut self) -> ExecutorResult<ExecOutcome<P::Item>> {
        self.checkpoint("produce_next")?;
        if !self.status.state().can_produce() {
            return Err(ExecutorError::illegal_transition(
                "produce_next",
                self.status.state().state_name(),
            ));
        }

        if let Some(item) = self.stash.pop() {
            return Ok(ExecOutcome::Advanced(item));
        }

        let mut budget: Option<YieldBudget> = None;
        loop {
            match self.plan.work() {
                Ok(StageOutcome::Advanced(item)) => {
                    self.post_batch_resume_token = self.plan.resume_token();
                    return Ok(ExecOutcome::Advanced(item));
                }
                Ok(StageOutcome::NeedTime) => continue,
                Ok(StageOutcome::EndOfData) => {
                    self.post_batch_resume_token = self.plan.resume_token();
                    return Ok(ExecOutcome::EndOfData);
                }
                Err(err) => {
                    let policy = self.policy;
                    let budget = budget.get_or_insert_with(|| policy.start());
                    self.yield_for(err, budget)?;
                }
            }
        }
    }

    /// Produce up to `max_count` results into `append`.
    ///
    /// `append(item, resume_token, count_so_far)` hands the item back with
    /// `Err(item)` to stop the batch; the item is stashed and not counted.
    pub fn produce_batch<F>(&mut self, max_count: usize, mut append: F) -> ExecutorResult<usize>
    where
        F: FnMut(P::Item, Option<&ResumeToken>, usize) -> Result<(), P::Item>,
    {
        let mut count = 0;
        while count < max_count {
            match self.produce_next()? {
                ExecOutcome::Advanced(item) => {
                    let token = self.plan.resume_token();
                    match append(item, token.as_ref(), count) {
                        Ok(()) => count += 1,
                        Err(item) => {
                            self.stash.push(item);
                            break;
                        }
                    }
                }
                ExecOutcome::EndOfData => break,
            }
        }
        self.post_batch_resume_token = self.plan.resume_token();
        Ok(count)
    }

    /// Produce and drop up to `max_count` results.
    pub fn discard_batch(&mut self, max_count: usize) -> ExecutorResult<usize> {
        self.produce_batch(max_count, |_, _, _| Ok(()))
    }

    /// Buffer a result for a later `produce_next`. Active or Saved only,
    /// and never once killed.
    pub fn stash(&mut self, item: P::Item) -> ExecutorResult<()> {
        self.checkpoint("stash")?;
        let state = self.status.state();
        if !state.can_stash() {
            return Err(ExecutorError::illegal_transition("stash", state.state_name()));
        }
        self.stash.push(item);
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE TRANSITIONS
    // =========================================================================

    /// Active → Saved. Call before releasing locks held for the executor.
    /// A killed executor cannot be saved; it can only be disposed.
    pub fn save_state(&mut self) -> ExecutorResult<()> {
        self.checkpoint("save_state")?;
        self.status.apply(LifecycleState::save)?;
        self.plan.save_state();
        Ok(())
    }

    /// Saved → Active, retrying transient conflicts within the policy's
    /// budget.
    pub fn restore_state(&mut self, ctx: &RestoreContext) -> ExecutorResult<()> {
        self.checkpoint("restore_state")?;
        self.status.state().restore()?;
        self.op_id = ctx.op_id();
        let budget = self.policy.start();
        self.restore_within(ctx, &budget)
    }

    /// Saved → Detached. Engine resources are released; position is kept.
    pub fn detach_from_operation_context(&mut self) -> ExecutorResult<()> {
        self.status.apply(LifecycleState::detach)?;
        self.plan.detach();
        Ok(())
    }

    /// Detached → Saved, now attached to `op_id`.
    pub fn reattach_to_operation_context(&mut self, op_id: OperationId) -> ExecutorResult<()> {
        self.status.apply(LifecycleState::reattach)?;
        self.op_id = op_id;
        self.plan.reattach(op_id);
        Ok(())
    }

    /// Save if Active so the caller can drop its locks. No-op otherwise,
    /// including for a killed executor, which will never be restored.
    pub fn release_all_acquired_resources(&mut self) -> ExecutorResult<()> {
        if self.status.state() == LifecycleState::Active && !self.status.is_killed() {
            self.save_state()?;
        }
        Ok(())
    }

    /// Set the kill flag. The first reason wins; later calls are ignored.
    pub fn mark_as_killed(&mut self, reason: impl Into<String>) -> ExecutorResult<()> {
        let reason = reason.into();
        if reason.is_empty() {
            return Err(ExecutorError::illegal_transition(
                "mark_as_killed without a reason",
                self.status.state().state_name(),
            ));
        }
        self.record_kill(&reason, Event::ExecutorKilled.severity());
        Ok(())
    }

    /// Any state → Disposed. Idempotent.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.plan.dispose();
        self.stash.clear();
        self.status.dispose();
        let id = self.id.to_string();
        log_event(Event::ExecutorDisposed, &[("executor", id.as_str())]);
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn checkpoint(&self, operation: &str) -> ExecutorResult<()> {
        self.status.check_live(operation)
    }

    /// Handle a plan failure during `produce_next`. Returns Ok when the
    /// executor yielded, restored, and the plan should be asked again.
    fn yield_for(&mut self, err: StageError, budget: &YieldBudget) -> ExecutorResult<()> {
        match err {
            StageError::WriteConflict if self.policy.allows_retry() => {
                self.yield_and_restore(budget, |budget| budget.pause())
            }
            StageError::Placement(err) if self.policy.allows_retry() => {
                match err
                    .stale_info()
                    .and_then(|info| info.critical_section_signal.clone())
                {
                    Some(signal) => {
                        self.metrics.increment_critical_section_waits();
                        let outcome =
                            self.yield_and_restore(budget, |budget| {
                                signal.wait_timeout(budget.remaining())
                            });
                        if outcome.is_err() && !signal.is_ready() {
                            self.sharding_yield = ShardingYieldState::from_error(&err);
                        }
                        outcome
                    }
                    None => Err(self.fail(StageError::Placement(err))),
                }
            }
            other => Err(self.fail(other)),
        }
    }

    /// Save, wait, revalidate, restore. A wait that gives up leaves the
    /// executor Saved and reports the exhausted budget.
    fn yield_and_restore(
        &mut self,
        budget: &YieldBudget,
        wait: impl FnOnce(&YieldBudget) -> bool,
    ) -> ExecutorResult<()> {
        self.save_state()?;
        self.metrics.increment_executor_yields();
        let id = self.id.to_string();
        log_event(Event::ExecutorYield, &[("executor", id.as_str())]);
        self.hooks.on_yield();

        if !wait(budget) {
            return Err(self.budget_exhausted());
        }
        if let Err(err) = self.hooks.revalidate() {
            return Err(self.fail(StageError::Placement(err)));
        }

        let ctx = RestoreContext::new(self.op_id);
        self.restore_within(&ctx, budget)
    }

    fn restore_within(&mut self, ctx: &RestoreContext, budget: &YieldBudget) -> ExecutorResult<()> {
        loop {
            match self.plan.restore_state(ctx) {
                Ok(()) => {
                    self.status.apply(LifecycleState::restore)?;
                    self.sharding_yield = None;
                    return Ok(());
                }
                Err(StageError::WriteConflict) if self.policy.allows_retry() => {
                    if !budget.pause() {
                        return Err(self.budget_exhausted());
                    }
                }
                Err(StageError::Placement(err)) if self.policy.allows_retry() => {
                    let signal = err
                        .stale_info()
                        .and_then(|info| info.critical_section_signal.clone());
                    match signal {
                        Some(signal) => {
                            self.metrics.increment_critical_section_waits();
                            if !signal.wait_timeout(budget.remaining()) {
                                self.sharding_yield = ShardingYieldState::from_error(&err);
                                return Err(self.budget_exhausted());
                            }
                        }
                        None => return Err(self.fail(StageError::Placement(err))),
                    }
                }
                Err(StageError::DataGone(msg)) => {
                    let err = ExecutorError::restore_failed(msg);
                    return Err(self.kill_with(err));
                }
                Err(other) => return Err(self.fail(other)),
            }
        }
    }

    /// Kill the executor for a non-retryable plan failure.
    fn fail(&mut self, err: StageError) -> ExecutorError {
        let err = match err {
            StageError::WriteConflict => {
                ExecutorError::write_conflict("write conflict not retried under the yield policy")
            }
            StageError::Placement(err) => {
                self.sharding_yield = ShardingYieldState::from_error(&err);
                ExecutorError::stale_placement(err)
            }
            StageError::DataGone(msg) | StageError::Failed(msg) => ExecutorError::plan_failed(msg),
        };
        self.kill_with(err)
    }

    fn kill_with(&mut self, err: ExecutorError) -> ExecutorError {
        self.record_kill(err.message(), Severity::Error);
        err
    }

    fn record_kill(&mut self, reason: &str, severity: Severity) {
        if self.status.mark_killed(reason) {
            self.metrics.increment_executors_killed();
            let id = self.id.to_string();
            log_event_at(
                Event::ExecutorKilled,
                severity,
                &[("executor", id.as_str()), ("reason", reason)],
            );
        }
    }

    fn budget_exhausted(&mut self) -> ExecutorError {
        self.metrics.increment_time_budget_exhaustions();
        let id = self.id.to_string();
        let max_wait = format!("{:?}", self.policy.max_wait());
        log_event(
            Event::ExecutorTimeBudgetExceeded,
            &[("executor", id.as_str()), ("max_wait", max_wait.as_str())],
        );
        ExecutorError::time_budget_exceeded(format!(
            "retry budget of {} exhausted",
            max_wait
        ))
    }
}

impl<P: PlanStage> Drop for PlanExecutor<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<P: PlanStage> std::fmt::Debug for PlanExecutor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("stashed", &self.stash.len())
            .finish_non_exhaustive()
    }
}
