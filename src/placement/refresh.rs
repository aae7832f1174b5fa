//! Metadata refresh coordination
//!
//! At most one refresh is tracked per database. Concurrent callers that see
//! the same missing or stale version join the registered refresh instead
//! of starting their own.
//!
//! Cancelling a handle does not stop the physical refresh; that belongs to
//! the refresher. It only stops this node from reporting the refresh as
//! pending to new waiters.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::errors::{ShardingError, ShardingResult};
use super::version::ReceivedVersion;
use crate::observability::{log_event, Event};

/// Outcome of a refresh as seen by waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The handle was cancelled before the refresh resolved.
    #[error("Metadata refresh for database {0} was cancelled")]
    Cancelled(String),

    /// The refresher reported a failure.
    #[error("Metadata refresh failed: {0}")]
    Failed(String),
}

/// Shared future resolved by the refresher.
pub type RefreshFuture = Shared<BoxFuture<'static, Result<(), RefreshError>>>;

/// Performs the actual metadata fetch for a database.
pub trait MetadataRefresher: Send + Sync {
    /// Start a refresh. The returned future resolves once the fetched
    /// placement has been installed (or the fetch failed). Implementations
    /// should stop early when `cancellation` fires.
    fn refresh(
        &self,
        db: &str,
        received: Option<ReceivedVersion>,
        cancellation: CancellationToken,
    ) -> BoxFuture<'static, Result<(), RefreshError>>;
}

/// A registered refresh: the shared future and its cancellation token.
#[derive(Clone)]
pub struct RefreshHandle {
    db: String,
    future: RefreshFuture,
    cancellation: CancellationToken,
}

impl RefreshHandle {
    pub fn new<F>(db: impl Into<String>, future: F, cancellation: CancellationToken) -> Self
    where
        F: Future<Output = Result<(), RefreshError>> + Send + 'static,
    {
        Self {
            db: db.into(),
            future: future.boxed().shared(),
            cancellation,
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    /// A clone of the shared future.
    pub fn future(&self) -> RefreshFuture {
        self.future.clone()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// True once the refresh has resolved, whether or not anyone awaited it.
    pub fn is_complete(&self) -> bool {
        self.future.peek().is_some() || self.future.clone().now_or_never().is_some()
    }

    /// Wait for the refresh, or for cancellation, whichever comes first. A
    /// refresh that already resolved reports its outcome even if the handle
    /// was cancelled afterwards.
    pub async fn wait(&self) -> Result<(), RefreshError> {
        tokio::select! {
            biased;
            outcome = self.future.clone() => outcome,
            _ = self.cancellation.cancelled() => Err(RefreshError::Cancelled(self.db.clone())),
        }
    }
}

impl fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshHandle")
            .field("db", &self.db)
            .field("cancelled", &self.is_cancelled())
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Tracks the in-flight refresh of each database.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    handles: Mutex<HashMap<String, RefreshHandle>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the registered handle for `db`, if any. Never creates one.
    pub fn start_or_join(&self, db: &str) -> Option<RefreshHandle> {
        self.lock().get(db).cloned()
    }

    /// Register a new refresh. Fails if one is already registered for the
    /// same database; it must be cancelled and cleared first.
    pub fn register(&self, handle: RefreshHandle) -> ShardingResult<()> {
        let mut handles = self.lock();
        if handles.contains_key(handle.db()) {
            return Err(ShardingError::RefreshAlreadyRegistered {
                db: handle.db().to_string(),
            });
        }
        log_event(Event::RefreshRegistered, &[("db", handle.db())]);
        handles.insert(handle.db().to_string(), handle);
        Ok(())
    }

    /// Cancel the registered refresh without removing it. Returns whether
    /// a handle was registered.
    pub fn cancel(&self, db: &str) -> bool {
        match self.lock().get(db) {
            Some(handle) => {
                if !handle.is_cancelled() {
                    handle.cancellation.cancel();
                    log_event(Event::RefreshCancelled, &[("db", db)]);
                }
                true
            }
            None => false,
        }
    }

    /// Drop the registered handle. Safe when none exists.
    pub fn clear(&self, db: &str) {
        if self.lock().remove(db).is_some() {
            log_event(Event::RefreshCleared, &[("db", db)]);
        }
    }

    /// Cancel, then clear.
    pub fn cancel_and_clear(&self, db: &str) {
        self.cancel(db);
        self.clear(db);
    }

    pub fn is_registered(&self, db: &str) -> bool {
        self.lock().contains_key(db)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RefreshHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
