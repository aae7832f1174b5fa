//! Shared fixtures for integration tests
//!
//! - `TestOpCtx`: operation context with explicit locks and versions
//! - `ScriptedPlan`: plan stage that replays a fixed script

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use shardcore::executor::{
    OperationId, PlanExecutor, PlanStage, RestoreContext, StageError, StageOutcome, YieldPolicy,
};
use shardcore::observability::MetricsRegistry;
use shardcore::placement::{
    CachedPlacementInfo, LockMode, OperationContext, PlacementVersion, ReceivedVersion, ShardId,
    ShardingRegistry, StaticShardIdentity, Timestamp,
};

pub const SHARD: &str = "shard-a";

#[derive(Debug, Clone, Default)]
pub struct TestOpCtx {
    locks: HashMap<String, LockMode>,
    write: bool,
    at_cluster_time: Option<Timestamp>,
    received: HashMap<String, ReceivedVersion>,
}

impl TestOpCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(mut self, db: &str, mode: LockMode) -> Self {
        self.locks.insert(db.to_string(), mode);
        self.write |= matches!(mode, LockMode::IntentExclusive | LockMode::Exclusive);
        self
    }

    /// IS lock, read intent.
    pub fn reader(db: &str) -> Self {
        Self::new().lock(db, LockMode::IntentShared)
    }

    /// IX lock, write intent.
    pub fn writer(db: &str) -> Self {
        Self::new().lock(db, LockMode::IntentExclusive)
    }

    pub fn at_cluster_time(mut self, ts: Timestamp) -> Self {
        self.at_cluster_time = Some(ts);
        self
    }

    pub fn received(mut self, db: &str, received: impl Into<ReceivedVersion>) -> Self {
        self.received.insert(db.to_string(), received.into());
        self
    }
}

impl OperationContext for TestOpCtx {
    fn db_lock_mode(&self, db: &str) -> Option<LockMode> {
        self.locks.get(db).copied()
    }

    fn is_write_locked(&self) -> bool {
        self.write
    }

    fn at_cluster_time(&self) -> Option<Timestamp> {
        self.at_cluster_time
    }

    fn received_db_version(&self, db: &str) -> Option<ReceivedVersion> {
        self.received.get(db).copied()
    }
}

pub fn registry() -> ShardingRegistry {
    ShardingRegistry::new(
        Arc::new(StaticShardIdentity::shard(SHARD)),
        Arc::new(MetricsRegistry::new()),
    )
}

pub fn placement(ts: u32) -> CachedPlacementInfo {
    CachedPlacementInfo::new(
        PlacementVersion::new_epoch(Timestamp::new(ts, 0)),
        ShardId::new(SHARD),
    )
}

/// Plan stage that replays `script`, then reports end of data.
#[derive(Debug, Default)]
pub struct ScriptedPlan {
    pub script: VecDeque<Result<StageOutcome<String>, StageError>>,
    pub restores: VecDeque<Result<(), StageError>>,
    pub work_calls: usize,
    pub saves: usize,
    pub detaches: usize,
    pub reattaches: usize,
    pub disposes: usize,
}

impl ScriptedPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn items(items: &[&str]) -> Self {
        let mut plan = Self::default();
        for item in items {
            plan.script
                .push_back(Ok(StageOutcome::Advanced(item.to_string())));
        }
        plan
    }

    pub fn then(mut self, step: Result<StageOutcome<String>, StageError>) -> Self {
        self.script.push_back(step);
        self
    }

    pub fn then_restore(mut self, step: Result<(), StageError>) -> Self {
        self.restores.push_back(step);
        self
    }
}

impl PlanStage for ScriptedPlan {
    type Item = String;

    fn work(&mut self) -> Result<StageOutcome<String>, StageError> {
        self.work_calls += 1;
        self.script
            .pop_front()
            .unwrap_or(Ok(StageOutcome::EndOfData))
    }

    fn save_state(&mut self) {
        self.saves += 1;
    }

    fn restore_state(&mut self, _ctx: &RestoreContext) -> Result<(), StageError> {
        self.restores.pop_front().unwrap_or(Ok(()))
    }

    fn detach(&mut self) {
        self.detaches += 1;
    }

    fn reattach(&mut self, _op_id: OperationId) {
        self.reattaches += 1;
    }

    fn dispose(&mut self) {
        self.disposes += 1;
    }

    fn is_eof(&self) -> bool {
        self.script.is_empty()
    }
}

pub fn executor(plan: ScriptedPlan) -> PlanExecutor<ScriptedPlan> {
    PlanExecutor::new(
        plan,
        OperationId::new(),
        YieldPolicy::new(
            std::time::Duration::from_millis(500),
            std::time::Duration::ZERO,
        ),
    )
}
