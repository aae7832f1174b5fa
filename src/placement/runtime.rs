//! Per-database sharding runtime and its access capabilities
//!
//! The version cache, the critical section and the move-primary flag of a
//! database form one unit behind a reader/writer lock. Access is two-level:
//!
//! 1. The caller holds the database lock (IS for readers, IX for mutators)
//! 2. The caller acquires a capability from the runtime
//!
//! `ScopedSharedRuntime` only exposes reads and version checks.
//! `ScopedExclusiveRuntime` additionally exposes every mutation. A reader
//! that acquires after a writer released observes the writer's update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::cache::VersionCache;
use super::checker;
use super::context::{AccessIntent, LockMode, OperationContext, ShardIdentity};
use super::critical_section::{
    CriticalSectionController, CriticalSectionPhase, CriticalSectionSignal,
};
use super::errors::{ShardingError, ShardingResult};
use super::refresh::{MetadataRefresher, RefreshCoordinator, RefreshHandle};
use super::version::{CachedPlacementInfo, ReceivedVersion};
use crate::observability::{log_event, Event, MetricsRegistry};

/// Databases whose primary is always the config server.
const CONFIG_SERVER_DATABASES: [&str; 2] = ["config", "admin"];

/// Guarded placement state of one database. Only reachable through a
/// capability.
#[doc(hidden)]
#[derive(Debug)]
pub struct RuntimeState {
    cache: VersionCache,
    critical_section: CriticalSectionController,
    move_primary_in_progress: bool,
}

/// Placement state of one database on this node.
pub struct DatabaseShardingRuntime {
    db: String,
    state: RwLock<RuntimeState>,
    identity: Arc<dyn ShardIdentity>,
    refresh: Arc<RefreshCoordinator>,
    metrics: Arc<MetricsRegistry>,
}

impl DatabaseShardingRuntime {
    pub fn new(
        db: impl Into<String>,
        identity: Arc<dyn ShardIdentity>,
        refresh: Arc<RefreshCoordinator>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let db = db.into();
        Self {
            state: RwLock::new(RuntimeState {
                cache: VersionCache::new(),
                critical_section: CriticalSectionController::new(db.clone()),
                move_primary_in_progress: false,
            }),
            db,
            identity,
            refresh,
            metrics,
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    /// Shared access. The caller must hold the database lock in IS or
    /// stronger.
    pub fn acquire_shared(
        &self,
        op_ctx: &dyn OperationContext,
    ) -> ShardingResult<ScopedSharedRuntime<'_>> {
        self.require_lock(op_ctx, LockMode::IntentShared)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ScopedSharedRuntime {
            runtime: self,
            state,
        })
    }

    /// Exclusive access. The caller must hold the database lock in IX or
    /// stronger.
    pub fn acquire_exclusive(
        &self,
        op_ctx: &dyn OperationContext,
    ) -> ShardingResult<ScopedExclusiveRuntime<'_>> {
        self.require_lock(op_ctx, LockMode::IntentExclusive)?;
        let state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Ok(ScopedExclusiveRuntime {
            runtime: self,
            state,
        })
    }

    fn require_lock(&self, op_ctx: &dyn OperationContext, required: LockMode) -> ShardingResult<()> {
        if op_ctx.holds_db_lock(&self.db, required) {
            Ok(())
        } else {
            Err(ShardingError::LockNotHeld {
                db: self.db.clone(),
                required,
            })
        }
    }
}

impl std::fmt::Debug for DatabaseShardingRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseShardingRuntime")
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

/// Read operations available under either capability.
pub trait ReadPlacement {
    #[doc(hidden)]
    fn runtime(&self) -> &DatabaseShardingRuntime;
    #[doc(hidden)]
    fn state(&self) -> &RuntimeState;

    fn db(&self) -> &str {
        &self.runtime().db
    }

    fn cached_info(&self) -> Option<&CachedPlacementInfo> {
        self.state().cache.get()
    }

    fn critical_section_phase(&self) -> CriticalSectionPhase {
        self.state().critical_section.phase()
    }

    fn critical_section_reason(&self) -> Option<&Value> {
        self.state().critical_section.reason()
    }

    /// Signal to wait on if the active critical section blocks `intent`.
    fn critical_section_signal(&self, intent: AccessIntent) -> Option<CriticalSectionSignal> {
        self.state().critical_section.signal(intent)
    }

    fn is_move_primary_in_progress(&self) -> bool {
        self.state().move_primary_in_progress
    }

    /// The registered metadata refresh, if one is in flight.
    fn metadata_refresh_future(&self) -> Option<RefreshHandle> {
        self.runtime().refresh.start_or_join(&self.runtime().db)
    }

    /// Check the version the router attached for this database. An
    /// unversioned operation always passes.
    fn check_db_version(&self, op_ctx: &dyn OperationContext) -> ShardingResult<()> {
        match op_ctx.received_db_version(self.db()) {
            Some(received) => self.check_version_or_throw(op_ctx, &received),
            None => Ok(()),
        }
    }

    /// Validate `received` against this node's cached placement.
    fn check_version_or_throw(
        &self,
        op_ctx: &dyn OperationContext,
        received: &ReceivedVersion,
    ) -> ShardingResult<()> {
        let runtime = self.runtime();
        let state = self.state();
        let outcome = checker::check_version_or_throw(
            &runtime.db,
            received,
            &state.cache,
            &state.critical_section,
            op_ctx.access_intent(),
            op_ctx.at_cluster_time(),
        );

        match &outcome {
            Ok(()) => runtime.metrics.increment_version_checks_passed(),
            Err(ShardingError::StaleDbVersion(info)) => {
                runtime.metrics.increment_stale_version_rejections();
                let received = info.received.to_string();
                log_event(
                    Event::StaleVersionRejected,
                    &[("db", runtime.db.as_str()), ("received", received.as_str())],
                );
            }
            Err(err @ ShardingError::MigrationConflict { .. }) => {
                runtime.metrics.increment_migration_conflicts();
                let message = err.to_string();
                log_event(
                    Event::MigrationConflict,
                    &[("db", runtime.db.as_str()), ("message", message.as_str())],
                );
            }
            Err(_) => {}
        }
        outcome
    }

    /// Fail unless this shard is the primary shard of the database and the
    /// request carries a current version.
    fn assert_is_primary_shard_for_db(&self, op_ctx: &dyn OperationContext) -> ShardingResult<()> {
        let runtime = self.runtime();

        if CONFIG_SERVER_DATABASES.contains(&runtime.db.as_str()) {
            if runtime.identity.is_config_server() {
                return Ok(());
            }
            return Err(ShardingError::illegal_operation(format!(
                "The config server is the primary shard for database: {}",
                runtime.db
            )));
        }

        let received = op_ctx.received_db_version(&runtime.db).ok_or_else(|| {
            ShardingError::illegal_operation(format!(
                "Received request without the version for the database {}",
                runtime.db
            ))
        })?;

        self.check_version_or_throw(op_ctx, &received)?;

        let this_shard = runtime.identity.shard_id();
        match self.cached_info() {
            Some(info) if *info.primary() == this_shard => Ok(()),
            Some(info) => Err(ShardingError::illegal_operation(format!(
                "This is not the primary shard for the database {}. Expected: {} Actual: {}",
                runtime.db,
                info.primary(),
                this_shard
            ))),
            None => Err(ShardingError::illegal_operation(format!(
                "No cached info for the database {}",
                runtime.db
            ))),
        }
    }
}

/// Shared capability: reads and version checks.
pub struct ScopedSharedRuntime<'a> {
    runtime: &'a DatabaseShardingRuntime,
    state: RwLockReadGuard<'a, RuntimeState>,
}

impl ReadPlacement for ScopedSharedRuntime<'_> {
    fn runtime(&self) -> &DatabaseShardingRuntime {
        self.runtime
    }

    fn state(&self) -> &RuntimeState {
        &self.state
    }
}

impl std::fmt::Debug for ScopedSharedRuntime<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSharedRuntime")
            .field("db", &self.runtime.db)
            .finish_non_exhaustive()
    }
}

/// Exclusive capability: reads plus every mutation.
pub struct ScopedExclusiveRuntime<'a> {
    runtime: &'a DatabaseShardingRuntime,
    state: RwLockWriteGuard<'a, RuntimeState>,
}

impl ReadPlacement for ScopedExclusiveRuntime<'_> {
    fn runtime(&self) -> &DatabaseShardingRuntime {
        self.runtime
    }

    fn state(&self) -> &RuntimeState {
        &self.state
    }
}

impl std::fmt::Debug for ScopedExclusiveRuntime<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedExclusiveRuntime")
            .field("db", &self.runtime.db)
            .finish_non_exhaustive()
    }
}

impl ScopedExclusiveRuntime<'_> {
    /// Install the cached placement and tear down any registered refresh,
    /// which can only report older metadata now.
    ///
    /// Once sharding is enabled, the primary must be this shard. During
    /// recovery the shard id is not known yet and the check is skipped.
    pub fn set_db_info(&mut self, info: CachedPlacementInfo) -> ShardingResult<()> {
        let runtime = self.runtime;
        if runtime.identity.is_enabled() {
            let this_shard = runtime.identity.shard_id();
            if *info.primary() != this_shard {
                return Err(ShardingError::PrimaryShardMismatch {
                    db: runtime.db.clone(),
                    found: info.primary().clone(),
                    expected: this_shard,
                });
            }
        }

        let version = info.version().to_string();
        log_event(
            Event::DbInfoSet,
            &[("db", runtime.db.as_str()), ("version", version.as_str())],
        );
        self.state.cache.set(info);
        runtime.refresh.cancel_and_clear(&runtime.db);
        Ok(())
    }

    /// Forget the cached placement, optionally cancelling the in-flight
    /// refresh so that nobody keeps waiting on outdated metadata.
    pub fn clear_db_info(&mut self, cancel_ongoing_refresh: bool) {
        let runtime = self.runtime;
        if cancel_ongoing_refresh {
            runtime.refresh.cancel(&runtime.db);
        }
        log_event(Event::DbInfoCleared, &[("db", runtime.db.as_str())]);
        self.state.cache.clear();
    }

    /// Idle → CatchUp. Cancels any in-flight refresh for the database.
    pub fn enter_critical_section_catch_up(&mut self, reason: Value) -> ShardingResult<()> {
        let runtime = self.runtime;
        let rendered = reason.to_string();
        self.state.critical_section.enter_catch_up(reason)?;
        runtime.refresh.cancel(&runtime.db);
        log_event(
            Event::CriticalSectionCatchUp,
            &[("db", runtime.db.as_str()), ("reason", rendered.as_str())],
        );
        Ok(())
    }

    /// CatchUp → Commit.
    pub fn enter_critical_section_commit(&mut self, reason: &Value) -> ShardingResult<()> {
        self.state.critical_section.enter_commit(reason)?;
        let rendered = reason.to_string();
        log_event(
            Event::CriticalSectionCommit,
            &[("db", self.runtime.db.as_str()), ("reason", rendered.as_str())],
        );
        Ok(())
    }

    /// CatchUp/Commit → Idle. The reason must match the entry reason.
    pub fn exit_critical_section(&mut self, reason: &Value) -> ShardingResult<()> {
        self.state.critical_section.exit(reason)?;
        let rendered = reason.to_string();
        log_event(
            Event::CriticalSectionExit,
            &[("db", self.runtime.db.as_str()), ("reason", rendered.as_str())],
        );
        Ok(())
    }

    /// Force Idle. Recovery and cleanup paths only.
    pub fn exit_critical_section_no_checks(&mut self) {
        self.state.critical_section.exit_no_checks();
        log_event(
            Event::CriticalSectionForcedExit,
            &[("db", self.runtime.db.as_str())],
        );
    }

    /// Requires the database lock in X mode.
    pub fn set_move_primary_in_progress(
        &mut self,
        op_ctx: &dyn OperationContext,
    ) -> ShardingResult<()> {
        self.runtime.require_lock(op_ctx, LockMode::Exclusive)?;
        self.state.move_primary_in_progress = true;
        log_event(Event::MovePrimaryStarted, &[("db", self.runtime.db.as_str())]);
        Ok(())
    }

    /// Requires the database lock in IX mode.
    pub fn unset_move_primary_in_progress(
        &mut self,
        op_ctx: &dyn OperationContext,
    ) -> ShardingResult<()> {
        self.runtime.require_lock(op_ctx, LockMode::IntentExclusive)?;
        self.state.move_primary_in_progress = false;
        log_event(Event::MovePrimaryFinished, &[("db", self.runtime.db.as_str())]);
        Ok(())
    }

    /// Register the refresh started by the owner. Fails if one is already
    /// registered.
    pub fn register_metadata_refresh(&mut self, handle: RefreshHandle) -> ShardingResult<()> {
        debug_assert_eq!(handle.db(), self.runtime.db);
        self.runtime.refresh.register(handle)
    }

    pub fn cancel_metadata_refresh(&mut self) {
        self.runtime.refresh.cancel(&self.runtime.db);
    }

    /// Drop the registered refresh, typically once its result is installed.
    pub fn reset_metadata_refresh(&mut self) {
        self.runtime.refresh.clear(&self.runtime.db);
    }
}

/// Node-wide map from database name to its runtime.
pub struct ShardingRegistry {
    identity: Arc<dyn ShardIdentity>,
    refresh: Arc<RefreshCoordinator>,
    metrics: Arc<MetricsRegistry>,
    databases: Mutex<HashMap<String, Arc<DatabaseShardingRuntime>>>,
}

impl ShardingRegistry {
    pub fn new(identity: Arc<dyn ShardIdentity>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            identity,
            refresh: Arc::new(RefreshCoordinator::new()),
            metrics,
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// Runtime for `db`, created on first use.
    pub fn get(&self, db: &str) -> Arc<DatabaseShardingRuntime> {
        let mut databases = self
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        databases
            .entry(db.to_string())
            .or_insert_with(|| {
                Arc::new(DatabaseShardingRuntime::new(
                    db,
                    Arc::clone(&self.identity),
                    Arc::clone(&self.refresh),
                    Arc::clone(&self.metrics),
                ))
            })
            .clone()
    }

    /// Names of every database with a runtime, sorted.
    pub fn databases(&self) -> Vec<String> {
        let databases = self
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = databases.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn identity(&self) -> &Arc<dyn ShardIdentity> {
        &self.identity
    }

    pub fn refresh_coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Join the live refresh of `db`, or start one through `refresher`.
    ///
    /// A cancelled or already resolved handle is replaced. The caller must
    /// hold the database lock in IX mode, since starting a refresh mutates
    /// the runtime.
    pub fn join_or_start_refresh(
        &self,
        op_ctx: &dyn OperationContext,
        db: &str,
        refresher: &dyn MetadataRefresher,
    ) -> ShardingResult<RefreshHandle> {
        let runtime = self.get(db);
        let mut exclusive = runtime.acquire_exclusive(op_ctx)?;

        if let Some(handle) = exclusive.metadata_refresh_future() {
            if !handle.is_cancelled() && !handle.is_complete() {
                self.metrics.increment_refreshes_joined();
                return Ok(handle);
            }
            exclusive.reset_metadata_refresh();
        }

        let cancellation = CancellationToken::new();
        let future = refresher.refresh(db, op_ctx.received_db_version(db), cancellation.clone());
        let handle = RefreshHandle::new(db, future, cancellation);
        exclusive.register_metadata_refresh(handle.clone())?;
        self.metrics.increment_refreshes_started();
        Ok(handle)
    }
}

impl std::fmt::Debug for ShardingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardingRegistry")
            .field("databases", &self.databases())
            .finish_non_exhaustive()
    }
}
