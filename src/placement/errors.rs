//! Placement error types
//!
//! Recoverable by the caller:
//! - `StaleDbVersion`: refresh cached metadata (or wait on the attached
//!   signal) and retry
//! - `MigrationConflict`: abort the transaction and restart with a new snapshot
//! - `IllegalOperation`: misrouted request or missing version; not retryable
//!
//! Contract violations (`Severity::Fatal`): wrong critical-section phase,
//! reason mismatch, missing intent lock, double refresh registration,
//! installing placement owned by another shard.

use std::fmt;

use thiserror::Error;

use super::context::LockMode;
use super::critical_section::CriticalSectionSignal;
use super::version::{PlacementVersion, ReceivedVersion, ShardId, Timestamp};
use crate::observability::Severity;

/// Result type for placement operations
pub type ShardingResult<T> = Result<T, ShardingError>;

/// Why a received version was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// A critical section blocks this access intent.
    CriticalSectionActive {
        /// Reason token the section was entered with, rendered as JSON.
        section_reason: String,
    },
    /// Nothing is cached for the database.
    NoCachedInfo,
    /// Something is cached but it differs from what was received.
    VersionMismatch,
}

/// Routing information carried by a stale-version failure.
#[derive(Debug, Clone)]
pub struct StaleDbVersionInfo {
    pub db: String,
    pub received: ReceivedVersion,
    /// Cached version, when one exists in the received version's epoch.
    pub wanted: Option<PlacementVersion>,
    /// Ready once the blocking critical section ends.
    pub critical_section_signal: Option<CriticalSectionSignal>,
    pub reason: StaleReason,
}

impl StaleDbVersionInfo {
    /// True when the caller should wait on a signal rather than refresh.
    pub fn should_wait(&self) -> bool {
        self.critical_section_signal.is_some()
    }

    /// True when the cached state cannot be compared against and a full
    /// refresh is required.
    pub fn requires_full_refresh(&self) -> bool {
        self.critical_section_signal.is_none() && self.wanted.is_none()
    }
}

impl fmt::Display for StaleDbVersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            StaleReason::CriticalSectionActive { section_reason } => write!(
                f,
                "The critical section for the database {} is acquired with reason: {}",
                self.db, section_reason
            )?,
            StaleReason::NoCachedInfo => {
                write!(f, "No cached info for the database {}", self.db)?
            }
            StaleReason::VersionMismatch => {
                write!(f, "Version mismatch for the database {}", self.db)?
            }
        }
        write!(f, " (received {}", self.received)?;
        if let Some(wanted) = &self.wanted {
            write!(f, ", wanted {}", wanted)?;
        }
        write!(f, ")")
    }
}

/// Placement errors
#[derive(Debug, Clone, Error)]
pub enum ShardingError {
    /// Received version does not match what this node can serve.
    #[error("{0}")]
    StaleDbVersion(Box<StaleDbVersionInfo>),

    /// Snapshot transaction predates a placement change.
    #[error(
        "Database {db} has undergone a catalog change operation at time {installed} and no \
         longer satisfies the requirements for the current transaction which requires \
         {required}. Transaction will be aborted."
    )]
    MigrationConflict {
        db: String,
        installed: Timestamp,
        required: Timestamp,
    },

    /// Caller-side contract violation visible to clients.
    #[error("Illegal operation: {0}")]
    IllegalOperation(String),

    /// Acquisition attempted without the database intent lock.
    #[error("Database {db} must be locked in {required} mode")]
    LockNotHeld { db: String, required: LockMode },

    /// Entering a critical section while one is active.
    #[error("Critical section for database {db} is already active in {phase} phase")]
    CriticalSectionAlreadyActive { db: String, phase: &'static str },

    /// Critical-section transition from the wrong phase.
    #[error("Critical section for database {db} is in {phase} phase, expected {expected}")]
    CriticalSectionWrongPhase {
        db: String,
        phase: &'static str,
        expected: &'static str,
    },

    /// Critical-section transition with a reason other than the entry reason.
    #[error("Critical section for database {db} was entered with a different reason")]
    CriticalSectionReasonMismatch { db: String },

    /// A refresh is already registered and was not cancelled and cleared.
    #[error("A metadata refresh is already registered for database {db}")]
    RefreshAlreadyRegistered { db: String },

    /// Installing placement whose primary is not this shard.
    #[error(
        "Expected to be setting this node's cached info for database {db} with its own \
         shard; found primary {found}, expected {expected}"
    )]
    PrimaryShardMismatch {
        db: String,
        found: ShardId,
        expected: ShardId,
    },
}

impl ShardingError {
    pub(crate) fn stale(info: StaleDbVersionInfo) -> Self {
        Self::StaleDbVersion(Box::new(info))
    }

    /// Create an illegal operation error.
    pub fn illegal_operation(message: impl Into<String>) -> Self {
        Self::IllegalOperation(message.into())
    }

    /// Stable error code for reporting.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StaleDbVersion(_) => "STALE_DB_VERSION",
            Self::MigrationConflict { .. } => "MIGRATION_CONFLICT",
            Self::IllegalOperation(_) => "ILLEGAL_OPERATION",
            Self::LockNotHeld { .. } => "LOCK_NOT_HELD",
            Self::CriticalSectionAlreadyActive { .. } => "CRITICAL_SECTION_ALREADY_ACTIVE",
            Self::CriticalSectionWrongPhase { .. } => "CRITICAL_SECTION_WRONG_PHASE",
            Self::CriticalSectionReasonMismatch { .. } => "CRITICAL_SECTION_REASON_MISMATCH",
            Self::RefreshAlreadyRegistered { .. } => "REFRESH_ALREADY_REGISTERED",
            Self::PrimaryShardMismatch { .. } => "PRIMARY_SHARD_MISMATCH",
        }
    }

    /// Severity: contract violations are fatal.
    pub fn severity(&self) -> Severity {
        match self {
            Self::StaleDbVersion(_)
            | Self::MigrationConflict { .. }
            | Self::IllegalOperation(_) => Severity::Error,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// True when refreshing (or waiting) and retrying the same request can
    /// succeed. A migration conflict needs a new transaction, not a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleDbVersion(_))
    }

    /// Routing details for a stale-version failure.
    pub fn stale_info(&self) -> Option<&StaleDbVersionInfo> {
        match self {
            Self::StaleDbVersion(info) => Some(info),
            _ => None,
        }
    }
}
