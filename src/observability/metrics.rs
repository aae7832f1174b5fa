//! Operational counters
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed atomics; metrics never order other memory operations

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for placement checks and executor lifecycle.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    version_checks_passed: AtomicU64,
    stale_version_rejections: AtomicU64,
    migration_conflicts: AtomicU64,
    critical_section_waits: AtomicU64,
    refreshes_started: AtomicU64,
    refreshes_joined: AtomicU64,
    executor_yields: AtomicU64,
    executors_killed: AtomicU64,
    time_budget_exhaustions: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_version_checks_passed(&self) {
        self.version_checks_passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_version_rejections(&self) {
        self.stale_version_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_migration_conflicts(&self) {
        self.migration_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_critical_section_waits(&self) {
        self.critical_section_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refreshes_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refreshes_joined(&self) {
        self.refreshes_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_executor_yields(&self) {
        self.executor_yields.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_executors_killed(&self) {
        self.executors_killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_time_budget_exhaustions(&self) {
        self.time_budget_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            version_checks_passed: self.version_checks_passed.load(Ordering::Relaxed),
            stale_version_rejections: self.stale_version_rejections.load(Ordering::Relaxed),
            migration_conflicts: self.migration_conflicts.load(Ordering::Relaxed),
            critical_section_waits: self.critical_section_waits.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_joined: self.refreshes_joined.load(Ordering::Relaxed),
            executor_yields: self.executor_yields.load(Ordering::Relaxed),
            executors_killed: self.executors_killed.load(Ordering::Relaxed),
            time_budget_exhaustions: self.time_budget_exhaustions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub version_checks_passed: u64,
    pub stale_version_rejections: u64,
    pub migration_conflicts: u64,
    pub critical_section_waits: u64,
    pub refreshes_started: u64,
    pub refreshes_joined: u64,
    pub executor_yields: u64,
    pub executors_killed: u64,
    pub time_budget_exhaustions: u64,
}

impl MetricsSnapshot {
    /// Serialize the snapshot as a single JSON object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
