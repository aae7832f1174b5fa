//! Executor Lifecycle Tests
//!
//! - Lifecycle legality, including disposed vs killed
//! - Stash ordering and batch push-back
//! - Kill stickiness
//! - Internal retries: storage conflicts, critical sections, time budget
//! - Placement revalidation after a yield

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{executor, placement, registry, ScriptedPlan, TestOpCtx};
use serde_json::json;
use shardcore::executor::{
    ExecOutcome, ExecutorErrorCode, LifecycleState, OperationId, PlacementYieldHooks, PlanExecutor,
    RestoreContext, StageError, StageOutcome, YieldPolicy,
};
use shardcore::observability::MetricsRegistry;
use shardcore::placement::{AccessIntent, PlacementVersion, ReadPlacement, Timestamp};

const DB: &str = "orders";

fn restore_ctx() -> RestoreContext {
    RestoreContext::new(OperationId::new())
}

fn next_item(exec: &mut PlanExecutor<ScriptedPlan>) -> Option<String> {
    exec.produce_next().unwrap().into_item()
}

// =============================================================================
// Lifecycle Legality
// =============================================================================

/// Active → Saved → Detached → Saved → Active → Disposed.
#[test]
fn test_full_lifecycle() {
    let mut exec = executor(ScriptedPlan::items(&["a"]));

    exec.save_state().unwrap();
    assert_eq!(exec.state(), LifecycleState::Saved);
    exec.detach_from_operation_context().unwrap();
    assert_eq!(exec.state(), LifecycleState::Detached);

    let op_id = OperationId::new();
    exec.reattach_to_operation_context(op_id).unwrap();
    assert_eq!(exec.op_id(), op_id);
    exec.restore_state(&RestoreContext::new(op_id)).unwrap();
    assert_eq!(exec.state(), LifecycleState::Active);

    assert_eq!(next_item(&mut exec), Some("a".to_string()));
    exec.dispose();
    assert_eq!(exec.state(), LifecycleState::Disposed);
    assert_eq!(exec.plan().detaches, 1);
    assert_eq!(exec.plan().reattaches, 1);
}

/// Only Active produces results.
#[test]
fn test_produce_requires_active() {
    let mut exec = executor(ScriptedPlan::items(&["a"]));
    exec.save_state().unwrap();

    let err = exec.produce_next().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::IllegalTransition);
    assert!(err.is_fatal());
    assert_eq!(exec.plan().work_calls, 0);

    exec.detach_from_operation_context().unwrap();
    assert!(exec.produce_next().unwrap_err().is_fatal());
}

/// Detach requires Saved; reattach requires Detached.
#[test]
fn test_detach_reattach_legality() {
    let mut exec = executor(ScriptedPlan::empty());
    assert!(exec.detach_from_operation_context().unwrap_err().is_fatal());
    assert!(exec
        .reattach_to_operation_context(OperationId::new())
        .unwrap_err()
        .is_fatal());
    assert_eq!(exec.state(), LifecycleState::Active);
}

/// Disposed and killed fail with different codes.
#[test]
fn test_disposed_distinct_from_killed() {
    let mut killed = executor(ScriptedPlan::items(&["a"]));
    killed.mark_as_killed("client disconnected").unwrap();
    let killed_err = killed.produce_next().unwrap_err();

    let mut disposed = executor(ScriptedPlan::items(&["a"]));
    disposed.dispose();
    let disposed_err = disposed.produce_next().unwrap_err();

    assert_eq!(killed_err.code(), ExecutorErrorCode::Killed);
    assert_eq!(disposed_err.code(), ExecutorErrorCode::Disposed);

    // Disposed wins over killed.
    killed.dispose();
    assert_eq!(
        killed.produce_next().unwrap_err().code(),
        ExecutorErrorCode::Disposed
    );
}

/// Every transition fails after dispose.
#[test]
fn test_disposed_is_terminal() {
    let mut exec = executor(ScriptedPlan::empty());
    exec.dispose();

    assert_eq!(exec.save_state().unwrap_err().code(), ExecutorErrorCode::Disposed);
    assert_eq!(
        exec.restore_state(&restore_ctx()).unwrap_err().code(),
        ExecutorErrorCode::Disposed
    );
    assert_eq!(
        exec.detach_from_operation_context().unwrap_err().code(),
        ExecutorErrorCode::Disposed
    );
    assert_eq!(
        exec.stash("x".into()).unwrap_err().code(),
        ExecutorErrorCode::Disposed
    );
    exec.dispose();
    assert_eq!(exec.plan().disposes, 1);
}

// =============================================================================
// Stash and Batches
// =============================================================================

/// [a, b, c] stashed → c, b, a, without touching the plan.
#[test]
fn test_stash_lifo_law() {
    let mut exec = executor(ScriptedPlan::empty());
    for item in ["a", "b", "c"] {
        exec.stash(item.to_string()).unwrap();
    }

    assert_eq!(next_item(&mut exec).as_deref(), Some("c"));
    assert_eq!(next_item(&mut exec).as_deref(), Some("b"));
    assert_eq!(next_item(&mut exec).as_deref(), Some("a"));
    assert_eq!(exec.plan().work_calls, 0);
    assert_eq!(exec.produce_next().unwrap(), ExecOutcome::EndOfData);
}

/// Stashing is allowed while Saved, not while Detached.
#[test]
fn test_stash_while_saved() {
    let mut exec = executor(ScriptedPlan::items(&["plan"]));
    exec.save_state().unwrap();
    exec.stash("buffered".into()).unwrap();

    exec.detach_from_operation_context().unwrap();
    assert!(exec.stash("late".into()).unwrap_err().is_fatal());
    exec.reattach_to_operation_context(OperationId::new()).unwrap();

    exec.restore_state(&restore_ctx()).unwrap();
    assert_eq!(next_item(&mut exec).as_deref(), Some("buffered"));
    assert_eq!(next_item(&mut exec).as_deref(), Some("plan"));
}

/// A refused item is pushed back uncounted and produced next.
#[test]
fn test_batch_refusal_pushes_back() {
    let mut exec = executor(ScriptedPlan::items(&["a", "b", "c"]));
    let mut batch = Vec::new();

    let count = exec
        .produce_batch(3, |item, _, so_far| {
            if item == "b" {
                return Err(item);
            }
            batch.push((item, so_far));
            Ok(())
        })
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(batch, vec![("a".to_string(), 0)]);
    assert_eq!(next_item(&mut exec).as_deref(), Some("b"));
    assert_eq!(next_item(&mut exec).as_deref(), Some("c"));
}

/// Discarding counts results without delivering them.
#[test]
fn test_discard_batch() {
    let mut exec = executor(ScriptedPlan::items(&["a", "b", "c"]));
    assert_eq!(exec.discard_batch(2).unwrap(), 2);
    assert!(!exec.is_eof());
    assert_eq!(exec.discard_batch(10).unwrap(), 1);
    assert!(exec.is_eof());
}

// =============================================================================
// Kill
// =============================================================================

/// First kill reason wins and sticks.
#[test]
fn test_kill_sticky_first_write_wins() {
    let metrics = Arc::new(MetricsRegistry::new());
    let mut exec = executor(ScriptedPlan::items(&["a", "b"])).with_metrics(Arc::clone(&metrics));

    exec.mark_as_killed("X").unwrap();
    exec.mark_as_killed("Y").unwrap();

    for _ in 0..3 {
        let err = exec.produce_next().unwrap_err();
        assert_eq!(err.kill_reason(), Some("X"));
    }
    assert_eq!(exec.plan().work_calls, 0);
    assert_eq!(exec.state(), LifecycleState::Active);
    assert_eq!(metrics.snapshot().executors_killed, 1);
    assert!(exec.is_eof());
}

/// After a plan failure only dispose is left: no save, no stash.
#[test]
fn test_killed_executor_only_disposes() {
    let plan = ScriptedPlan::items(&["a"]).then(Err(StageError::Failed("disk gone".into())));
    let mut exec = executor(plan);
    assert_eq!(next_item(&mut exec).as_deref(), Some("a"));
    exec.produce_next().unwrap_err();

    let err = exec.save_state().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::Killed);
    assert_eq!(err.kill_reason(), Some("disk gone"));
    assert_eq!(exec.state(), LifecycleState::Active);

    let err = exec.stash("late".into()).unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::Killed);
    assert_eq!(exec.stashed_len(), 0);

    exec.dispose();
    assert_eq!(exec.state(), LifecycleState::Disposed);
    assert_eq!(exec.plan().disposes, 1);
}

/// Kill is observed by restore too; detach and dispose stay legal.
#[test]
fn test_kill_observed_at_restore() {
    let mut exec = executor(ScriptedPlan::empty());
    exec.save_state().unwrap();
    exec.mark_as_killed("shutdown").unwrap();

    let err = exec.restore_state(&restore_ctx()).unwrap_err();
    assert_eq!(err.kill_reason(), Some("shutdown"));
    assert_eq!(exec.state(), LifecycleState::Saved);

    exec.detach_from_operation_context().unwrap();
    exec.dispose();
}

// =============================================================================
// Internal Retries
// =============================================================================

/// Repeated storage conflicts are retried within the budget.
#[test]
fn test_write_conflicts_retried() {
    let plan = ScriptedPlan::empty()
        .then(Err(StageError::WriteConflict))
        .then(Err(StageError::WriteConflict))
        .then(Ok(StageOutcome::Advanced("a".into())))
        .then_restore(Err(StageError::WriteConflict));
    let metrics = Arc::new(MetricsRegistry::new());
    let mut exec = executor(plan).with_metrics(Arc::clone(&metrics));

    assert_eq!(next_item(&mut exec).as_deref(), Some("a"));
    assert_eq!(exec.state(), LifecycleState::Active);
    assert_eq!(metrics.snapshot().executor_yields, 2);
    assert!(!exec.is_killed());
}

/// An endless conflict exhausts the budget: Saved, not killed.
#[test]
fn test_time_budget_exceeded() {
    let mut plan = ScriptedPlan::empty();
    for _ in 0..10_000 {
        plan.script.push_back(Err(StageError::WriteConflict));
    }
    let mut exec = PlanExecutor::new(
        plan,
        OperationId::new(),
        YieldPolicy::new(Duration::from_millis(20), Duration::from_millis(5)),
    );

    let err = exec.produce_next().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::TimeBudgetExceeded);
    assert!(!exec.is_killed());
    assert_eq!(exec.state(), LifecycleState::Saved);
}

/// Growing pauses keep the number of yields per budget small.
#[test]
fn test_yields_per_budget_bounded() {
    let mut plan = ScriptedPlan::empty();
    for _ in 0..10_000 {
        plan.script.push_back(Err(StageError::WriteConflict));
    }
    let metrics = Arc::new(MetricsRegistry::new());
    let mut exec = PlanExecutor::new(
        plan,
        OperationId::new(),
        YieldPolicy::new(Duration::from_millis(50), Duration::ZERO),
    )
    .with_metrics(Arc::clone(&metrics));

    let err = exec.produce_next().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::TimeBudgetExceeded);
    let yields = metrics.snapshot().executor_yields;
    assert!(yields >= 1);
    assert!(yields <= 8, "{} yields in 50ms", yields);
}

/// Restore gives up on the budget the same way.
#[test]
fn test_restore_budget_exceeded() {
    let mut plan = ScriptedPlan::empty();
    for _ in 0..10_000 {
        plan.restores.push_back(Err(StageError::WriteConflict));
    }
    let mut exec = PlanExecutor::new(
        plan,
        OperationId::new(),
        YieldPolicy::new(Duration::from_millis(20), Duration::from_millis(5)),
    );
    exec.save_state().unwrap();

    let err = exec.restore_state(&restore_ctx()).unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::TimeBudgetExceeded);
    assert_eq!(exec.state(), LifecycleState::Saved);
}

/// A critical section reported by the plan is waited out.
#[test]
fn test_critical_section_waited_out() {
    let registry = registry();
    let info = placement(5);
    let runtime = registry.get(DB);
    let reason = json!("migration");

    let stale = {
        let mut exclusive = runtime.acquire_exclusive(&TestOpCtx::writer(DB)).unwrap();
        exclusive.set_db_info(info.clone()).unwrap();
        exclusive.enter_critical_section_catch_up(reason.clone()).unwrap();
        let writer = TestOpCtx::writer(DB).received(DB, info.version());
        exclusive.check_db_version(&writer).unwrap_err()
    };
    assert!(runtime
        .acquire_shared(&TestOpCtx::reader(DB))
        .unwrap()
        .critical_section_signal(AccessIntent::Write)
        .is_some());

    let plan = ScriptedPlan::empty()
        .then(Err(StageError::Placement(stale)))
        .then(Ok(StageOutcome::Advanced("after".into())));
    let mut exec = executor(plan);

    let releaser = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            runtime
                .acquire_exclusive(&TestOpCtx::writer(DB))
                .unwrap()
                .exit_critical_section(&reason)
                .unwrap();
        })
    };

    assert_eq!(next_item(&mut exec).as_deref(), Some("after"));
    releaser.join().unwrap();
    assert!(exec.sharding_yield_state().is_none());
}

/// A critical section with retries disabled kills and records the signal.
#[test]
fn test_critical_section_without_retry_records_signal() {
    let registry = registry();
    let info = placement(5);
    let runtime = registry.get(DB);

    let stale = {
        let mut exclusive = runtime.acquire_exclusive(&TestOpCtx::writer(DB)).unwrap();
        exclusive.set_db_info(info.clone()).unwrap();
        exclusive.enter_critical_section_catch_up(json!("m")).unwrap();
        let writer = TestOpCtx::writer(DB).received(DB, info.version());
        exclusive.check_db_version(&writer).unwrap_err()
    };

    let plan = ScriptedPlan::empty().then(Err(StageError::Placement(stale)));
    let mut exec = PlanExecutor::new(plan, OperationId::new(), YieldPolicy::no_retry());

    let err = exec.produce_next().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::StalePlacement);
    assert!(exec.is_killed());
    let state = exec.sharding_yield_state().expect("recorded");
    assert!(state.critical_section_signal().is_some());
    assert!(state.refresh_required().is_none());
}

/// A required refresh is never retried internally.
#[test]
fn test_refresh_required_not_retried() {
    let registry = registry();
    let runtime = registry.get(DB);
    let received = PlacementVersion::new_epoch(Timestamp::new(3, 0));
    let reader = TestOpCtx::reader(DB).received(DB, received);
    let stale = runtime
        .acquire_shared(&reader)
        .unwrap()
        .check_db_version(&reader)
        .unwrap_err();

    let plan = ScriptedPlan::empty()
        .then(Err(StageError::Placement(stale)))
        .then(Ok(StageOutcome::Advanced("never".into())));
    let mut exec = executor(plan);

    let err = exec.produce_next().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::StalePlacement);
    assert!(err.placement().unwrap().is_retryable());
    assert_eq!(exec.plan().work_calls, 1);
    assert_eq!(
        exec.sharding_yield_state().unwrap().refresh_required(),
        Some(DB)
    );
}

/// Data dropped during a yield makes restore terminal.
#[test]
fn test_restore_after_drop_is_terminal() {
    let plan = ScriptedPlan::items(&["a"])
        .then_restore(Err(StageError::DataGone("collection orders dropped".into())));
    let mut exec = executor(plan);

    exec.save_state().unwrap();
    let err = exec.restore_state(&restore_ctx()).unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::RestoreFailed);

    let again = exec.restore_state(&restore_ctx()).unwrap_err();
    assert_eq!(again.kill_reason(), Some("collection orders dropped"));
}

// =============================================================================
// Placement Revalidation
// =============================================================================

/// A placement change during a yield stops the executor after the wait.
#[test]
fn test_revalidation_after_yield() {
    let registry = registry();
    let info = placement(5);
    let runtime = registry.get(DB);
    runtime
        .acquire_exclusive(&TestOpCtx::writer(DB))
        .unwrap()
        .set_db_info(info.clone())
        .unwrap();

    let op_ctx = Arc::new(TestOpCtx::reader(DB).received(DB, info.version()));
    let hooks = PlacementYieldHooks::new(Arc::clone(&runtime), op_ctx);

    // The placement moves on after the operation's version was issued.
    runtime
        .acquire_exclusive(&TestOpCtx::writer(DB))
        .unwrap()
        .set_db_info(placement(6))
        .unwrap();

    let plan = ScriptedPlan::empty()
        .then(Err(StageError::WriteConflict))
        .then(Ok(StageOutcome::Advanced("a".into())));
    let mut exec = executor(plan).with_hooks(Box::new(hooks));

    let err = exec.produce_next().unwrap_err();
    assert_eq!(err.code(), ExecutorErrorCode::StalePlacement);
    assert!(exec.is_killed());
    assert_eq!(exec.state(), LifecycleState::Saved);
    assert!(exec.sharding_yield_state().unwrap().refresh_required().is_some());
}

/// Releasing resources saves an active executor and nothing else.
#[test]
fn test_release_all_acquired_resources() {
    let mut exec = executor(ScriptedPlan::items(&["a"]));
    exec.release_all_acquired_resources().unwrap();
    assert_eq!(exec.state(), LifecycleState::Saved);
    exec.release_all_acquired_resources().unwrap();
    assert_eq!(exec.plan().saves, 1);
}
