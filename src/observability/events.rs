//! Observable events
//!
//! Every state change in the placement and executor subsystems maps to one
//! typed event. Events are explicit; free-form event names are not used.

use std::fmt;

use super::logger::{Component, Severity};

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded and validated
    ConfigLoaded,

    // Placement cache
    /// Cached database placement installed
    DbInfoSet,
    /// Cached database placement cleared
    DbInfoCleared,
    /// Received version rejected as stale
    StaleVersionRejected,
    /// Snapshot transaction conflicts with a placement change
    MigrationConflict,

    // Critical section
    /// Catch-up phase entered
    CriticalSectionCatchUp,
    /// Commit phase entered
    CriticalSectionCommit,
    /// Critical section released
    CriticalSectionExit,
    /// Critical section forcibly released during recovery or cleanup
    CriticalSectionForcedExit,

    // Move primary
    /// Move-primary flag raised
    MovePrimaryStarted,
    /// Move-primary flag lowered
    MovePrimaryFinished,

    // Metadata refresh
    /// Refresh future registered
    RefreshRegistered,
    /// Refresh cancelled
    RefreshCancelled,
    /// Refresh slot cleared
    RefreshCleared,

    // Executor
    /// Executor yielded to wait out a conflict
    ExecutorYield,
    /// Executor marked as killed
    ExecutorKilled,
    /// Executor exhausted its retry budget
    ExecutorTimeBudgetExceeded,
    /// Executor disposed
    ExecutorDisposed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::DbInfoSet => "DB_INFO_SET",
            Event::DbInfoCleared => "DB_INFO_CLEARED",
            Event::StaleVersionRejected => "STALE_DB_VERSION",
            Event::MigrationConflict => "MIGRATION_CONFLICT",

            Event::CriticalSectionCatchUp => "CRITICAL_SECTION_CATCH_UP",
            Event::CriticalSectionCommit => "CRITICAL_SECTION_COMMIT",
            Event::CriticalSectionExit => "CRITICAL_SECTION_EXIT",
            Event::CriticalSectionForcedExit => "CRITICAL_SECTION_FORCED_EXIT",

            Event::MovePrimaryStarted => "MOVE_PRIMARY_STARTED",
            Event::MovePrimaryFinished => "MOVE_PRIMARY_FINISHED",

            Event::RefreshRegistered => "DB_REFRESH_REGISTERED",
            Event::RefreshCancelled => "DB_REFRESH_CANCELLED",
            Event::RefreshCleared => "DB_REFRESH_CLEARED",

            Event::ExecutorYield => "EXECUTOR_YIELD",
            Event::ExecutorKilled => "EXECUTOR_KILLED",
            Event::ExecutorTimeBudgetExceeded => "EXECUTOR_TIME_BUDGET_EXCEEDED",
            Event::ExecutorDisposed => "EXECUTOR_DISPOSED",
        }
    }

    /// The subsystem that owns this event.
    pub fn component(&self) -> Component {
        match self {
            Event::ConfigLoaded => Component::Control,
            Event::ExecutorYield
            | Event::ExecutorKilled
            | Event::ExecutorTimeBudgetExceeded
            | Event::ExecutorDisposed => Component::Executor,
            _ => Component::Sharding,
        }
    }

    /// Default severity for this event.
    pub fn severity(&self) -> Severity {
        match self {
            Event::StaleVersionRejected | Event::ExecutorYield => Severity::Trace,
            Event::MigrationConflict
            | Event::CriticalSectionForcedExit
            | Event::RefreshCancelled
            | Event::ExecutorKilled
            | Event::ExecutorTimeBudgetExceeded => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
