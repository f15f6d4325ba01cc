//! Strategies deciding how a due, non-stale refresh is carried out.

mod non_blocking;
mod one_caller_blocks;

pub use non_blocking::{NonBlockingPrefetchStrategy, RefreshExecutor, MAX_CONCURRENT_REFRESHES};
pub use one_caller_blocks::OneCallerBlocksPrefetchStrategy;

/// Unit of refresh work handed to a [`PrefetchStrategy`].
///
/// The closure performs the whole refresh and reports nothing back; outcome
/// handling is the caller's business.
pub type Updater = Box<dyn FnOnce() + Send + 'static>;

/// Decides when and where a prefetch refresh runs.
///
/// Implementations are best effort: they may run the updater on the calling
/// thread, hand it to another thread, or drop it silently when a refresh for
/// the same cache is already in flight or a resource limit is reached.
/// `prefetch` never reports an error to its caller.
pub trait PrefetchStrategy: Send + Sync {
    /// Possibly runs `updater`, synchronously or asynchronously.
    fn prefetch(&self, updater: Updater);

    /// Releases resources owned by this strategy instance.
    ///
    /// Does not cancel an updater that is already running. Calling `close`
    /// more than once is harmless.
    fn close(&self) {}
}
