//! Errors surfaced by the cached result supplier.

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error returned by a value producer.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by [`CachedResultSupplier::get`](crate::CachedResultSupplier::get).
#[derive(Debug, Error)]
pub enum CacheError {
    /// No value is available after a refresh attempt.
    ///
    /// Returned when the cache is empty and either another caller held the
    /// refresh lock past the bounded wait, or the refresh failed under
    /// [`StaleValueBehavior::Allow`](crate::StaleValueBehavior::Allow).
    #[error("a concurrent operation is in progress, causing the current operation to fail")]
    ConcurrentOperation,

    /// The producer failed while the value was stale and the policy is
    /// [`StaleValueBehavior::Strict`](crate::StaleValueBehavior::Strict).
    #[error("failed to refresh cached value: {0}")]
    Refresh(#[source] BoxError),
}

impl CacheError {
    /// Returns a stable code for the error kind.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConcurrentOperation => "ConcurrentOperationFailed",
            Self::Refresh(_) => "CacheRefreshFailed",
        }
    }
}
