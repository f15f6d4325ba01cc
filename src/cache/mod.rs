//! Self-refreshing, concurrency-safe single-value cache.
//!
//! A [`CachedResultSupplier`] wraps a producer of [`RefreshResult`]s. Each
//! result carries the instant after which it is *stale* (must be refreshed
//! before being served) and the instant after which a *prefetch* (early,
//! best-effort refresh) should be attempted. How a prefetch runs is decided by
//! a [`PrefetchStrategy`]:
//!
//! - [`OneCallerBlocksPrefetchStrategy`] refreshes on the calling thread,
//! - [`NonBlockingPrefetchStrategy`] hands the refresh to a shared
//!   [`RefreshExecutor`] and returns immediately.

mod errors;
mod jitter;
pub mod prefetch;
mod refresh_result;
mod stale_value;
mod supplier;

pub use errors::{BoxError, CacheError};
pub use jitter::{Jitter, DEFAULT_JITTER_RANGE, DEFAULT_JITTER_START};
pub use prefetch::{
    NonBlockingPrefetchStrategy, OneCallerBlocksPrefetchStrategy, PrefetchStrategy,
    RefreshExecutor, Updater, MAX_CONCURRENT_REFRESHES,
};
pub use refresh_result::{RefreshResult, RefreshResultBuilder};
pub use stale_value::{ParseStaleValueBehaviorError, StaleValueBehavior};
pub use supplier::{
    CacheConfig, CachedResultSupplier, CachedResultSupplierBuilder, Clock,
    DEFAULT_BLOCKING_REFRESH_MAX_WAIT,
};
