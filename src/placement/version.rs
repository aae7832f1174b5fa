//! Placement version vocabulary
//!
//! - `Timestamp` is a logical cluster time, totally ordered
//! - `PlacementVersion` is (epoch, timestamp); versions are comparable only
//!   within one epoch
//! - `ReceivedVersion` is what a router attaches to a request: a placement
//!   version plus an optional placement conflict time
//!
//! These are pure value types.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical cluster time: seconds plus an increment within the second.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    secs: u32,
    inc: u32,
}

impl Timestamp {
    /// The null timestamp. As a placement conflict time it means "ignore".
    pub const ZERO: Timestamp = Timestamp { secs: 0, inc: 0 };

    #[inline]
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    #[inline]
    pub fn secs(&self) -> u32 {
        self.secs
    }

    #[inline]
    pub fn inc(&self) -> u32 {
        self.inc
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

/// Identifier of a shard.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version of a database's placement: which epoch, and when within it.
///
/// Equality compares both parts. Ordering is only defined when epochs
/// match; `partial_cmp` returns `None` across epochs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PlacementVersion {
    epoch: Uuid,
    timestamp: Timestamp,
}

impl PlacementVersion {
    pub fn new(epoch: Uuid, timestamp: Timestamp) -> Self {
        Self { epoch, timestamp }
    }

    /// A version in a freshly generated epoch.
    pub fn new_epoch(timestamp: Timestamp) -> Self {
        Self::new(Uuid::new_v4(), timestamp)
    }

    #[inline]
    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// True when both versions belong to the same epoch.
    #[inline]
    pub fn same_epoch(&self, other: &PlacementVersion) -> bool {
        self.epoch == other.epoch
    }

    /// The next version within this epoch.
    pub fn bumped(&self, timestamp: Timestamp) -> Self {
        debug_assert!(timestamp > self.timestamp);
        Self::new(self.epoch, timestamp)
    }
}

impl PartialOrd for PlacementVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.epoch != other.epoch {
            return None;
        }
        Some(self.timestamp.cmp(&other.timestamp))
    }
}

impl fmt::Display for PlacementVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.epoch, self.timestamp)
    }
}

/// A placement version as attached to an incoming request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReceivedVersion {
    version: PlacementVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    placement_conflict_time: Option<Timestamp>,
}

impl ReceivedVersion {
    pub fn new(version: PlacementVersion) -> Self {
        Self {
            version,
            placement_conflict_time: None,
        }
    }

    pub fn with_placement_conflict_time(mut self, time: Timestamp) -> Self {
        self.placement_conflict_time = Some(time);
        self
    }

    #[inline]
    pub fn version(&self) -> PlacementVersion {
        self.version
    }

    #[inline]
    pub fn placement_conflict_time(&self) -> Option<Timestamp> {
        self.placement_conflict_time
    }

    /// A null conflict time opts the operation out of conflict checking,
    /// including for transactions reading at a cluster time.
    pub fn ignores_placement_conflict(&self) -> bool {
        matches!(self.placement_conflict_time, Some(t) if t.is_null())
    }
}

impl From<PlacementVersion> for ReceivedVersion {
    fn from(version: PlacementVersion) -> Self {
        Self::new(version)
    }
}

impl fmt::Display for ReceivedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.placement_conflict_time {
            Some(t) => write!(f, "{} (conflict time {})", self.version, t),
            None => write!(f, "{}", self.version),
        }
    }
}

/// The placement this node believes in for one database.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CachedPlacementInfo {
    version: PlacementVersion,
    primary: ShardId,
}

impl CachedPlacementInfo {
    pub fn new(version: PlacementVersion, primary: ShardId) -> Self {
        Self { version, primary }
    }

    #[inline]
    pub fn version(&self) -> PlacementVersion {
        self.version
    }

    #[inline]
    pub fn primary(&self) -> &ShardId {
        &self.primary
    }
}
