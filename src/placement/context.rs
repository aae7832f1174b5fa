//! Contracts consumed from outside the placement subsystem
//!
//! - `OperationContext`: the lock and transaction state of one operation
//! - `ShardIdentity`: which shard this node is and what role it plays
//!
//! The lock manager and the transaction layer live elsewhere; this module
//! only names what the placement code needs to ask them.

use super::version::{ReceivedVersion, ShardId, Timestamp};

/// Database-level lock modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// IS
    IntentShared,
    /// IX
    IntentExclusive,
    /// S
    Shared,
    /// X
    Exclusive,
}

impl LockMode {
    /// True when holding `self` satisfies a requirement of `required`.
    pub fn covers(&self, required: LockMode) -> bool {
        use LockMode::*;
        match required {
            IntentShared => true,
            IntentExclusive => matches!(self, IntentExclusive | Exclusive),
            Shared => matches!(self, Shared | Exclusive),
            Exclusive => matches!(self, Exclusive),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::IntentShared => "IS",
            LockMode::IntentExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operation intends to do with the data it is about to touch.
///
/// Determines which critical-section phases block it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    Write,
}

/// Lock and transaction state of the calling operation.
pub trait OperationContext {
    /// Mode in which the operation holds the lock on `db`, if any.
    fn db_lock_mode(&self, db: &str) -> Option<LockMode>;

    /// Whether the operation holds any write lock.
    fn is_write_locked(&self) -> bool;

    /// Snapshot time of the enclosing transaction, if it reads at one.
    fn at_cluster_time(&self) -> Option<Timestamp>;

    /// Version the router attached for `db`. `None` means the operation
    /// is unversioned for that database.
    fn received_db_version(&self, db: &str) -> Option<ReceivedVersion>;

    /// Intent used to pick the critical-section signal.
    fn access_intent(&self) -> AccessIntent {
        if self.is_write_locked() {
            AccessIntent::Write
        } else {
            AccessIntent::Read
        }
    }

    /// True when the operation holds `db` in at least `required` mode.
    fn holds_db_lock(&self, db: &str, required: LockMode) -> bool {
        self.db_lock_mode(db)
            .map(|held| held.covers(required))
            .unwrap_or(false)
    }
}

/// Identity of the local shard.
pub trait ShardIdentity: Send + Sync {
    /// This node's shard id.
    fn shard_id(&self) -> ShardId;

    /// False while the node is still recovering and does not yet know its
    /// shard id for certain.
    fn is_enabled(&self) -> bool;

    /// True when this node is part of the config server replica set.
    fn is_config_server(&self) -> bool;
}

/// A fixed shard identity, typically built from configuration.
#[derive(Debug, Clone)]
pub struct StaticShardIdentity {
    shard_id: ShardId,
    enabled: bool,
    config_server: bool,
}

impl StaticShardIdentity {
    pub fn new(shard_id: ShardId, enabled: bool, config_server: bool) -> Self {
        Self {
            shard_id,
            enabled,
            config_server,
        }
    }

    /// An enabled, non-config-server shard.
    pub fn shard(shard_id: impl Into<String>) -> Self {
        Self::new(ShardId::new(shard_id), true, false)
    }
}

impl ShardIdentity for StaticShardIdentity {
    fn shard_id(&self) -> ShardId {
        self.shard_id.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_config_server(&self) -> bool {
        self.config_server
    }
}
