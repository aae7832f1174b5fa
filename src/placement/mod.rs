//! Database placement consistency
//!
//! Every shard caches, per database, which placement version it believes
//! current and which shard is primary. Requests arrive carrying the version
//! the router believed current. This subsystem decides whether such a
//! request may proceed:
//!
//! - `version`: timestamps, epochs, received and cached versions
//! - `cache`: the per-database cached placement
//! - `critical_section`: the migration gate and its wake-up signal
//! - `checker`: the stale/conflict decision
//! - `refresh`: one in-flight metadata refresh per database
//! - `runtime`: per-database state behind shared/exclusive capabilities
//!
//! A passed check is a point-in-time judgment. Callers hold the database
//! intent lock for the duration of the work that depends on it.

mod cache;
mod checker;
mod context;
mod critical_section;
mod errors;
mod refresh;
mod runtime;
mod version;

pub use cache::VersionCache;
pub use checker::{check_placement_conflict, check_version_or_throw};
pub use context::{AccessIntent, LockMode, OperationContext, ShardIdentity, StaticShardIdentity};
pub use critical_section::{CriticalSectionController, CriticalSectionPhase, CriticalSectionSignal};
pub use errors::{ShardingError, ShardingResult, StaleDbVersionInfo, StaleReason};
pub use refresh::{
    MetadataRefresher, RefreshCoordinator, RefreshError, RefreshFuture, RefreshHandle,
};
pub use runtime::{
    DatabaseShardingRuntime, ReadPlacement, RuntimeState, ScopedExclusiveRuntime,
    ScopedSharedRuntime, ShardingRegistry,
};
pub use version::{CachedPlacementInfo, PlacementVersion, ReceivedVersion, ShardId, Timestamp};
