//! The cached result supplier and its refresh loop.

use super::errors::{BoxError, CacheError};
use super::jitter::Jitter;
use super::prefetch::{OneCallerBlocksPrefetchStrategy, PrefetchStrategy};
use super::refresh_result::RefreshResult;
use super::stale_value::StaleValueBehavior;
use crate::prelude::{debug, error, info};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::OffsetDateTime;

/// Default bound on how long a caller waits for another caller's refresh.
pub const DEFAULT_BLOCKING_REFRESH_MAX_WAIT: Duration = Duration::from_secs(5);

/// Source of the current instant. Injectable for deterministic tests.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync + 'static>;

type Producer<T> = Arc<dyn Fn() -> Result<RefreshResult<T>, BoxError> + Send + Sync + 'static>;

/// Tunables of a [`CachedResultSupplier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a caller waits for the refresh lock before falling back to the
    /// current snapshot.
    pub blocking_refresh_max_wait: Duration,
    /// Jitter applied to the instants of every new snapshot.
    pub jitter: Jitter,
    /// What to do when refreshing a stale value fails.
    pub stale_value_behavior: StaleValueBehavior,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            blocking_refresh_max_wait: DEFAULT_BLOCKING_REFRESH_MAX_WAIT,
            jitter: Jitter::default(),
            stale_value_behavior: StaleValueBehavior::default(),
        }
    }
}

/// Self-refreshing single-value cache.
///
/// Wraps a producer returning [`RefreshResult`]s and serves the latest value
/// to any number of threads:
/// - a missing or stale value is refreshed synchronously before returning,
/// - a value past its prefetch instant is handed to the configured
///   [`PrefetchStrategy`] and served as-is (or as refreshed, if the strategy
///   ran the refresh on the calling thread),
/// - at most one caller runs the producer at a time; others wait up to
///   [`CacheConfig::blocking_refresh_max_wait`] and then serve what is cached.
///
/// Reads are lock-free: the snapshot is an immutable [`RefreshResult`] swapped
/// atomically on every successful refresh.
///
/// Cloning yields another handle to the same cache. The prefetch strategy is
/// closed when the last handle is dropped.
///
/// # Examples
///
/// ```
/// use idaas_credential::{CachedResultSupplier, RefreshResult};
/// use time::{Duration, OffsetDateTime};
///
/// let supplier = CachedResultSupplier::builder(|| {
///     let now = OffsetDateTime::now_utc();
///     Ok::<_, std::io::Error>(
///         RefreshResult::builder(String::from("token"))
///             .stale_time(now + Duration::minutes(10))
///             .prefetch_time(now + Duration::minutes(5))
///             .build(),
///     )
/// })
/// .build();
///
/// assert_eq!(supplier.get()?, "token");
/// # Ok::<(), idaas_credential::CacheError>(())
/// ```
pub struct CachedResultSupplier<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CachedResultSupplier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    // Latest successful refresh; `None` until the first one.
    cached: ArcSwapOption<RefreshResult<T>>,
    // Serializes producer calls.
    refresh_lock: Mutex<()>,
    producer: Producer<T>,
    prefetch_strategy: Arc<dyn PrefetchStrategy>,
    clock: Clock,
    config: CacheConfig,
}

impl<T: Debug> Debug for CachedResultSupplier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedResultSupplier")
            .field("cached", &self.inner.cached.load().as_deref())
            .field("refresh_lock", &"<Mutex<()>>")
            .field("producer", &"<Producer>")
            .field("prefetch_strategy", &"<PrefetchStrategy>")
            .field("clock", &"<Clock>")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.prefetch_strategy.close();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefreshTrigger {
    // The value is missing or stale; the caller needs a fresh one.
    Stale,
    // The value is past its prefetch instant but still servable.
    Prefetch,
}

/// What a refresh attempt ended up doing, when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    AlreadyFresh,
    LockTimeout,
    ServedStale,
}

fn is_stale<T>(snapshot: Option<&RefreshResult<T>>, now: OffsetDateTime) -> bool {
    snapshot.map_or(true, |result| result.is_stale_at(now))
}

impl RefreshTrigger {
    fn still_needed<T>(self, snapshot: Option<&RefreshResult<T>>, now: OffsetDateTime) -> bool {
        match self {
            Self::Stale => is_stale(snapshot, now),
            Self::Prefetch => {
                is_stale(snapshot, now) || snapshot.is_some_and(|r| r.is_prefetch_due_at(now))
            }
        }
    }
}

impl<T> Inner<T> {
    fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }

    fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome, CacheError> {
        let wait = self.config.blocking_refresh_max_wait;
        let Some(_guard) = self.refresh_lock.try_lock_for(wait) else {
            error!(
                "failed to acquire cache refresh lock within {}ms; serving the current value",
                wait.as_millis()
            );
            return Ok(RefreshOutcome::LockTimeout);
        };

        // Another caller may have refreshed while we waited.
        if !trigger.still_needed(self.cached.load().as_deref(), self.now()) {
            return Ok(RefreshOutcome::AlreadyFresh);
        }

        match (self.producer)() {
            Ok(result) => {
                let jitter = self.config.jitter;
                let result = result.map_times(|t| jitter.apply(t));
                self.cached.store(Some(Arc::new(result)));
                Ok(RefreshOutcome::Refreshed)
            }
            Err(err) => match self.config.stale_value_behavior {
                StaleValueBehavior::Strict => Err(CacheError::Refresh(err)),
                StaleValueBehavior::Allow => {
                    info!("cached value refresh failed, keeping the current value: {err}");
                    Ok(RefreshOutcome::ServedStale)
                }
            },
        }
    }
}

impl<T> CachedResultSupplier<T>
where
    T: Send + Sync + 'static,
{
    /// Starts a builder around `producer`.
    pub fn builder<F, E>(producer: F) -> CachedResultSupplierBuilder<T>
    where
        F: Fn() -> Result<RefreshResult<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        CachedResultSupplierBuilder::new(producer)
    }

    /// Creates a cache around `producer` with default settings.
    pub fn new<F, E>(producer: F) -> Self
    where
        F: Fn() -> Result<RefreshResult<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::builder(producer).build()
    }

    /// Returns the cached value, refreshing it first if it is missing or stale.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Refresh`] if the value is stale, the producer fails and
    ///   the policy is [`StaleValueBehavior::Strict`]. The cached value is left
    ///   untouched and the next call retries.
    /// - [`CacheError::ConcurrentOperation`] if no value could be obtained at
    ///   all: the refresh lock timed out on an empty cache, or the producer
    ///   failed under [`StaleValueBehavior::Allow`] with nothing cached.
    pub fn get(&self) -> Result<T, CacheError>
    where
        T: Clone,
    {
        let mut snapshot = self.inner.cached.load_full();
        if is_stale(snapshot.as_deref(), self.inner.now()) {
            self.inner.refresh(RefreshTrigger::Stale)?;
            snapshot = self.inner.cached.load_full();
        }

        let Some(snapshot) = snapshot else {
            return Err(CacheError::ConcurrentOperation);
        };

        if snapshot.is_prefetch_due_at(self.inner.now()) {
            self.prefetch();
            // A strategy running on this thread may already have swapped in a newer value.
            if let Some(latest) = self.inner.cached.load_full() {
                return Ok(latest.value().clone());
            }
        }

        Ok(snapshot.value().clone())
    }

    /// Returns the current snapshot without triggering any refresh.
    pub fn snapshot(&self) -> Option<Arc<RefreshResult<T>>> {
        self.inner.cached.load_full()
    }

    /// Returns the configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Closes the prefetch strategy. The cache keeps serving and refreshing
    /// synchronously afterwards. Idempotent.
    pub fn close(&self) {
        self.inner.prefetch_strategy.close();
    }

    fn prefetch(&self) {
        let inner: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        self.inner.prefetch_strategy.prefetch(Box::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(err) = inner.refresh(RefreshTrigger::Prefetch) {
                debug!("background refresh of cached value failed: {err}");
            }
        }));
    }
}

/// Builder for [`CachedResultSupplier`].
pub struct CachedResultSupplierBuilder<T> {
    producer: Producer<T>,
    prefetch_strategy: Option<Arc<dyn PrefetchStrategy>>,
    clock: Option<Clock>,
    config: CacheConfig,
}

impl<T> Debug for CachedResultSupplierBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedResultSupplierBuilder")
            .field("producer", &"<Producer>")
            .field(
                "prefetch_strategy",
                &self.prefetch_strategy.as_ref().map(|_| "<PrefetchStrategy>"),
            )
            .field("clock", &self.clock.as_ref().map(|_| "<Clock>"))
            .field("config", &self.config)
            .finish()
    }
}

impl<T> CachedResultSupplierBuilder<T>
where
    T: Send + Sync + 'static,
{
    fn new<F, E>(producer: F) -> Self
    where
        F: Fn() -> Result<RefreshResult<T>, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            producer: Arc::new(move || producer().map_err(Into::into)),
            prefetch_strategy: None,
            clock: None,
            config: CacheConfig::default(),
        }
    }

    /// Sets the prefetch strategy. Defaults to [`OneCallerBlocksPrefetchStrategy`].
    #[must_use]
    pub fn prefetch_strategy<S>(mut self, strategy: S) -> Self
    where
        S: PrefetchStrategy + 'static,
    {
        self.prefetch_strategy = Some(Arc::new(strategy));
        self
    }

    /// Replaces all tunables at once.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the policy applied when refreshing a stale value fails.
    #[must_use]
    pub fn stale_value_behavior(mut self, behavior: StaleValueBehavior) -> Self {
        self.config.stale_value_behavior = behavior;
        self
    }

    /// Sets the bounded wait for the refresh lock.
    #[must_use]
    pub fn blocking_refresh_max_wait(mut self, wait: Duration) -> Self {
        self.config.blocking_refresh_max_wait = wait;
        self
    }

    /// Sets the jitter applied to new snapshots. Use [`Jitter::none`] to disable it.
    #[must_use]
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Replaces the wall clock.
    #[must_use]
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> OffsetDateTime + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Builds the cache. Nothing is fetched until the first [`CachedResultSupplier::get`].
    pub fn build(self) -> CachedResultSupplier<T> {
        let prefetch_strategy = self
            .prefetch_strategy
            .unwrap_or_else(|| Arc::new(OneCallerBlocksPrefetchStrategy::new()));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(OffsetDateTime::now_utc));

        CachedResultSupplier {
            inner: Arc::new(Inner {
                cached: ArcSwapOption::empty(),
                refresh_lock: Mutex::new(()),
                producer: self.producer,
                prefetch_strategy,
                clock,
                config: self.config,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(secs)
    }

    fn manual_clock(start: i64) -> (Arc<Mutex<OffsetDateTime>>, impl Fn() -> OffsetDateTime) {
        let now = Arc::new(Mutex::new(at(start)));
        let handle = Arc::clone(&now);
        (now, move || *handle.lock())
    }

    #[test]
    fn first_get_populates_the_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let supplier = CachedResultSupplier::builder(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(RefreshResult::builder(42).build())
        })
        .build();

        assert!(supplier.snapshot().is_none());
        assert_eq!(supplier.get().unwrap(), 42);
        assert_eq!(supplier.get().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_is_skipped_when_already_fresh() {
        let (_, clock) = manual_clock(0);
        let supplier = CachedResultSupplier::builder(|| {
            Ok::<_, io::Error>(RefreshResult::builder(()).stale_time(at(100)).build())
        })
        .clock(clock)
        .jitter(Jitter::none())
        .build();

        supplier.get().unwrap();
        let outcome = supplier.inner.refresh(RefreshTrigger::Stale).unwrap();
        assert_eq!(outcome, RefreshOutcome::AlreadyFresh);
    }

    #[test]
    fn prefetch_trigger_refreshes_past_prefetch_time() {
        let (now, clock) = manual_clock(0);
        let supplier = CachedResultSupplier::builder(|| {
            Ok::<_, io::Error>(
                RefreshResult::builder(())
                    .stale_time(at(100))
                    .prefetch_time(at(50))
                    .build(),
            )
        })
        .clock(clock)
        .jitter(Jitter::none())
        .build();

        supplier.get().unwrap();
        *now.lock() = at(60);
        let outcome = supplier.inner.refresh(RefreshTrigger::Prefetch).unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed);
    }

    #[test]
    fn lock_timeout_serves_current_value_even_when_strict() {
        let supplier = CachedResultSupplier::builder(|| {
            Err::<RefreshResult<u8>, _>(io::Error::other("unreachable"))
        })
        .stale_value_behavior(StaleValueBehavior::Strict)
        .blocking_refresh_max_wait(Duration::from_millis(20))
        .build();

        let _held = supplier.inner.refresh_lock.lock();
        let outcome = supplier.inner.refresh(RefreshTrigger::Stale).unwrap();
        assert_eq!(outcome, RefreshOutcome::LockTimeout);
    }

    #[test]
    fn jitter_is_applied_to_new_snapshots() {
        let (_, clock) = manual_clock(0);
        let jitter = Jitter {
            start: Duration::from_secs(60),
            range: Duration::from_secs(30),
        };
        let supplier = CachedResultSupplier::builder(|| {
            Ok::<_, io::Error>(
                RefreshResult::builder(())
                    .stale_time(at(10))
                    .prefetch_time(at(5))
                    .build(),
            )
        })
        .clock(clock)
        .jitter(jitter)
        .build();

        supplier.get().unwrap();
        let snapshot = supplier.snapshot().unwrap();
        let stale = snapshot.stale_time().unwrap();
        let prefetch = snapshot.prefetch_time().unwrap();
        assert!(stale >= at(70) && stale <= at(100));
        assert!(prefetch >= at(65) && prefetch <= at(95));
    }

    #[test]
    fn allow_failure_on_empty_cache_is_concurrent_operation() {
        let supplier = CachedResultSupplier::builder(|| {
            Err::<RefreshResult<u8>, _>(io::Error::other("endpoint down"))
        })
        .build();

        let err = supplier.get().unwrap_err();
        assert!(matches!(err, CacheError::ConcurrentOperation));
        assert_eq!(err.code(), "ConcurrentOperationFailed");
    }

    #[test]
    fn strict_failure_surfaces_the_cause() {
        let supplier = CachedResultSupplier::builder(|| {
            Err::<RefreshResult<u8>, _>(io::Error::other("endpoint down"))
        })
        .stale_value_behavior(StaleValueBehavior::Strict)
        .build();

        match supplier.get() {
            Err(CacheError::Refresh(cause)) => assert_eq!(cause.to_string(), "endpoint down"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn dropping_the_last_handle_closes_the_strategy() {
        struct Recording(Arc<AtomicUsize>);
        impl PrefetchStrategy for Recording {
            fn prefetch(&self, updater: crate::cache::prefetch::Updater) {
                updater();
            }
            fn close(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let closes = Arc::new(AtomicUsize::new(0));
        let supplier = CachedResultSupplier::builder(|| {
            Ok::<_, io::Error>(RefreshResult::builder(1).build())
        })
        .prefetch_strategy(Recording(Arc::clone(&closes)))
        .build();
        let other = supplier.clone();

        drop(supplier);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        drop(other);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
