//! Executor error types
//!
//! Error codes:
//! - EXECUTOR_KILLED (ERROR)
//! - EXECUTOR_TIME_BUDGET_EXCEEDED (ERROR)
//! - EXECUTOR_DISPOSED (ERROR)
//! - EXECUTOR_WRITE_CONFLICT (ERROR)
//! - EXECUTOR_STALE_PLACEMENT (ERROR)
//! - EXECUTOR_PLAN_FAILED (ERROR)
//! - EXECUTOR_RESTORE_FAILED (ERROR)
//! - EXECUTOR_ILLEGAL_TRANSITION (FATAL)

use std::fmt;

use crate::placement::ShardingError;

/// Severity levels for executor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation failed but the process is healthy
    Error,
    /// Calling discipline was violated; the process must halt
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Executor error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorCode {
    /// The executor was marked killed; carries the stored reason
    Killed,
    /// The internal retry loop ran out of time
    TimeBudgetExceeded,
    /// Operation attempted after dispose
    Disposed,
    /// Storage conflict that the yield policy does not retry
    WriteConflict,
    /// The plan observed stale or conflicting placement
    StalePlacement,
    /// Non-retryable plan failure
    PlanFailed,
    /// The data the plan depended on is gone
    RestoreFailed,
    /// Operation not legal in the current lifecycle state (FATAL)
    IllegalTransition,
}

impl ExecutorErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorErrorCode::Killed => "EXECUTOR_KILLED",
            ExecutorErrorCode::TimeBudgetExceeded => "EXECUTOR_TIME_BUDGET_EXCEEDED",
            ExecutorErrorCode::Disposed => "EXECUTOR_DISPOSED",
            ExecutorErrorCode::WriteConflict => "EXECUTOR_WRITE_CONFLICT",
            ExecutorErrorCode::StalePlacement => "EXECUTOR_STALE_PLACEMENT",
            ExecutorErrorCode::PlanFailed => "EXECUTOR_PLAN_FAILED",
            ExecutorErrorCode::RestoreFailed => "EXECUTOR_RESTORE_FAILED",
            ExecutorErrorCode::IllegalTransition => "EXECUTOR_ILLEGAL_TRANSITION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            ExecutorErrorCode::IllegalTransition => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ExecutorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Executor error type with full context
#[derive(Debug, Clone)]
pub struct ExecutorError {
    code: ExecutorErrorCode,
    message: String,
    /// Stored kill reason, verbatim
    kill_reason: Option<String>,
    /// Underlying placement failure
    placement: Option<ShardingError>,
}

impl ExecutorError {
    fn new(code: ExecutorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kill_reason: None,
            placement: None,
        }
    }

    /// Create a killed error carrying the stored reason
    pub fn killed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            kill_reason: Some(reason.clone()),
            ..Self::new(ExecutorErrorCode::Killed, reason)
        }
    }

    /// Create a time budget error
    pub fn time_budget_exceeded(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::TimeBudgetExceeded, reason)
    }

    /// Create a disposed error
    pub fn disposed(operation: &str) -> Self {
        Self::new(
            ExecutorErrorCode::Disposed,
            format!("{} called on a disposed executor", operation),
        )
    }

    /// Create a write conflict error
    pub fn write_conflict(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::WriteConflict, reason)
    }

    /// Wrap a placement failure
    pub fn stale_placement(err: ShardingError) -> Self {
        Self {
            placement: Some(err.clone()),
            ..Self::new(ExecutorErrorCode::StalePlacement, err.to_string())
        }
    }

    /// Create a plan failure error
    pub fn plan_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::PlanFailed, reason)
    }

    /// Create a restore failure error
    pub fn restore_failed(reason: impl Into<String>) -> Self {
        Self::new(ExecutorErrorCode::RestoreFailed, reason)
    }

    /// Create an illegal transition error (FATAL)
    pub fn illegal_transition(operation: &str, state: &str) -> Self {
        Self::new(
            ExecutorErrorCode::IllegalTransition,
            format!("{} is not legal in state {}", operation, state),
        )
    }

    /// Returns the error code
    pub fn code(&self) -> ExecutorErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the kill reason for `Killed` errors
    pub fn kill_reason(&self) -> Option<&str> {
        self.kill_reason.as_deref()
    }

    /// Returns the placement failure for `StalePlacement` errors
    pub fn placement(&self) -> Option<&ShardingError> {
        self.placement.as_ref()
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for ExecutorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.placement
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;
