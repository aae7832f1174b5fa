//! Per-database cached placement
//!
//! A guarded value, not a lock. It is only reachable through the
//! runtime's shared/exclusive capabilities, which is what makes reads and
//! writes safe. Logging of set/clear belongs to the owner.

use super::version::CachedPlacementInfo;

/// Last known placement version and primary shard for one database.
#[derive(Debug, Default, Clone)]
pub struct VersionCache {
    info: Option<CachedPlacementInfo>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cached info, if any.
    pub fn get(&self) -> Option<&CachedPlacementInfo> {
        self.info.as_ref()
    }

    /// Install `info`, replacing whatever was cached. Idempotent.
    pub fn set(&mut self, info: CachedPlacementInfo) {
        self.info = Some(info);
    }

    /// Forget the cached info. Idempotent.
    pub fn clear(&mut self) {
        self.info = None;
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_none()
    }
}
