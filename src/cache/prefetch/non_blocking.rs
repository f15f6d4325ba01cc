use super::{PrefetchStrategy, Updater};
use crate::prelude::{debug, warn};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of refreshes that may be queued or running at once on a
/// [`RefreshExecutor`].
pub const MAX_CONCURRENT_REFRESHES: usize = 100;

const WORKER_THREAD_NAME: &str = "idaas-credential-refresh";

/// Shared limiter for background refreshes.
///
/// One dedicated worker thread runs refresh tasks in submission order, and a
/// counting semaphore caps how many tasks may be queued or running at once.
/// Cloning the executor yields another handle to the same worker and
/// semaphore, so every [`NonBlockingPrefetchStrategy`] built from clones of
/// one executor shares a single global cap.
///
/// The worker thread is started on the first submission. [`RefreshExecutor::shutdown`]
/// stops accepting work, lets queued tasks finish and joins the worker.
#[derive(Clone)]
pub struct RefreshExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    capacity: usize,
    leases: Arc<Semaphore>,
    worker: Mutex<WorkerState>,
}

#[derive(Default)]
struct WorkerState {
    sender: Option<SyncSender<Updater>>,
    handle: Option<JoinHandle<()>>,
    shut_down: bool,
}

/// Permission to have one refresh queued or running. Released on drop.
pub(crate) struct RefreshLease {
    _permit: OwnedSemaphorePermit,
}

impl Debug for RefreshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let worker = self.inner.worker.lock();
        f.debug_struct("RefreshExecutor")
            .field("capacity", &self.inner.capacity)
            .field("available_leases", &self.inner.leases.available_permits())
            .field("worker_started", &worker.handle.is_some())
            .field("shut_down", &worker.shut_down)
            .finish()
    }
}

impl Default for RefreshExecutor {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_REFRESHES)
    }
}

impl RefreshExecutor {
    /// Creates an executor allowing at most `max_concurrent_refreshes` queued
    /// or running refreshes. A capacity of zero is raised to one.
    pub fn new(max_concurrent_refreshes: usize) -> Self {
        let capacity = max_concurrent_refreshes.max(1);
        Self {
            inner: Arc::new(ExecutorInner {
                capacity,
                leases: Arc::new(Semaphore::new(capacity)),
                worker: Mutex::new(WorkerState::default()),
            }),
        }
    }

    /// Returns the process-wide executor used when no executor is injected.
    pub fn shared() -> Self {
        static SHARED: OnceLock<RefreshExecutor> = OnceLock::new();
        SHARED.get_or_init(Self::default).clone()
    }

    /// Maximum number of queued or running refreshes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of refreshes that can still be admitted right now.
    pub fn available_leases(&self) -> usize {
        self.inner.leases.available_permits()
    }

    /// Returns `true` once [`RefreshExecutor::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.worker.lock().shut_down
    }

    /// Stops accepting refreshes, drains the queue and joins the worker thread.
    ///
    /// Idempotent. When called from a task running on the worker itself the
    /// worker is left to exit on its own.
    pub fn shutdown(&self) {
        let handle = {
            let mut worker = self.inner.worker.lock();
            worker.shut_down = true;
            worker.sender = None;
            worker.handle.take()
        };
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("refresh worker thread terminated abnormally");
        }
    }

    /// Tries to take one lease without waiting.
    pub(crate) fn try_acquire_lease(&self) -> Option<RefreshLease> {
        Arc::clone(&self.inner.leases)
            .try_acquire_owned()
            .ok()
            .map(|permit| RefreshLease { _permit: permit })
    }

    /// Queues `task` on the worker, starting it if needed.
    ///
    /// Returns the task back if the executor is shut down, the queue is full
    /// or the worker could not be started.
    pub(crate) fn execute(&self, task: Updater) -> Result<(), Updater> {
        let mut worker = self.inner.worker.lock();
        if worker.shut_down {
            return Err(task);
        }
        if worker.sender.is_none() {
            let (sender, receiver) = mpsc::sync_channel(self.inner.capacity);
            match thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_owned())
                .spawn(move || run_worker(&receiver))
            {
                Ok(handle) => {
                    worker.handle = Some(handle);
                    worker.sender = Some(sender);
                }
                Err(err) => {
                    warn!("failed to start refresh worker thread: {err}");
                    return Err(task);
                }
            }
        }
        let Some(sender) = worker.sender.clone() else {
            return Err(task);
        };
        drop(worker);

        sender.try_send(task).map_err(|err| match err {
            TrySendError::Full(task) | TrySendError::Disconnected(task) => task,
        })
    }
}

fn run_worker(receiver: &Receiver<Updater>) {
    while let Ok(task) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!("background refresh panicked");
        }
    }
    debug!("refresh worker stopped");
}

/// Prefetch strategy that hands refreshes to a shared [`RefreshExecutor`].
///
/// Callers never block on a prefetch: they return the current value while the
/// executor's worker refreshes in the background. At most one prefetch per
/// strategy instance is queued or running, and the executor's lease count
/// caps how many are outstanding across all instances sharing it. When no
/// lease is free the prefetch is skipped and a warning is logged.
pub struct NonBlockingPrefetchStrategy {
    executor: RefreshExecutor,
    currently_prefetching: Arc<AtomicBool>,
}

impl Debug for NonBlockingPrefetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingPrefetchStrategy")
            .field("executor", &self.executor)
            .field(
                "currently_prefetching",
                &self.currently_prefetching.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl Default for NonBlockingPrefetchStrategy {
    fn default() -> Self {
        Self::new(RefreshExecutor::shared())
    }
}

impl NonBlockingPrefetchStrategy {
    /// Creates a strategy submitting work to `executor`.
    pub fn new(executor: RefreshExecutor) -> Self {
        Self {
            executor,
            currently_prefetching: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The executor this strategy submits to.
    pub fn executor(&self) -> &RefreshExecutor {
        &self.executor
    }

    /// Returns `true` while a prefetch of this instance is queued or running.
    pub fn is_prefetching(&self) -> bool {
        self.currently_prefetching.load(Ordering::Acquire)
    }
}

// Owned by the submitted task: clears the instance flag and returns the
// lease whether the task runs, panics, or is dropped unrun.
struct PrefetchCleanup {
    flag: Arc<AtomicBool>,
    _lease: RefreshLease,
}

impl Drop for PrefetchCleanup {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl PrefetchStrategy for NonBlockingPrefetchStrategy {
    fn prefetch(&self, updater: Updater) {
        let Some(lease) = self.executor.try_acquire_lease() else {
            warn!(
                "skipping background refresh: only {} concurrent refreshes are allowed",
                self.executor.capacity()
            );
            return;
        };

        if self.currently_prefetching.load(Ordering::Acquire) {
            return;
        }
        self.currently_prefetching.store(true, Ordering::Release);

        let cleanup = PrefetchCleanup {
            flag: Arc::clone(&self.currently_prefetching),
            _lease: lease,
        };
        let task: Updater = Box::new(move || {
            let _cleanup = cleanup;
            updater();
        });

        if let Err(rejected) = self.executor.execute(task) {
            warn!("background refresh rejected by executor");
            drop(rejected);
        }
    }

    fn close(&self) {
        self.currently_prefetching.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn runs_updater_off_the_calling_thread() {
        let executor = RefreshExecutor::new(4);
        let strategy = NonBlockingPrefetchStrategy::new(executor.clone());
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();

        strategy.prefetch(Box::new(move || tx.send(thread::current().id()).unwrap()));

        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
        wait_until(|| !strategy.is_prefetching());
        assert_eq!(executor.available_leases(), 4);
        executor.shutdown();
    }

    #[test]
    fn one_prefetch_per_instance() {
        let executor = RefreshExecutor::new(10);
        let strategy = NonBlockingPrefetchStrategy::new(executor.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let first = Arc::clone(&calls);
        strategy.prefetch(Box::new(move || {
            first.fetch_add(1, Ordering::SeqCst);
            release_rx.recv().unwrap();
        }));
        let second = Arc::clone(&calls);
        strategy.prefetch(Box::new(move || {
            second.fetch_add(1, Ordering::SeqCst);
        }));

        // The rejected duplicate must have returned its lease.
        assert_eq!(executor.available_leases(), 9);

        release_tx.send(()).unwrap();
        wait_until(|| !strategy.is_prefetching());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.available_leases(), 10);
        executor.shutdown();
    }

    #[test]
    fn skips_when_leases_are_exhausted() {
        let executor = RefreshExecutor::new(1);
        let busy = NonBlockingPrefetchStrategy::new(executor.clone());
        let other = NonBlockingPrefetchStrategy::new(executor.clone());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ran = Arc::new(AtomicBool::new(false));

        busy.prefetch(Box::new(move || {
            release_rx.recv().unwrap();
        }));
        assert_eq!(executor.available_leases(), 0);

        let flag = Arc::clone(&ran);
        other.prefetch(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(!other.is_prefetching());

        release_tx.send(()).unwrap();
        wait_until(|| executor.available_leases() == 1);
        assert!(!ran.load(Ordering::SeqCst));

        let flag = Arc::clone(&ran);
        other.prefetch(Box::new(move || flag.store(true, Ordering::SeqCst)));
        wait_until(|| ran.load(Ordering::SeqCst));
        executor.shutdown();
    }

    #[test]
    fn rejected_submission_releases_flag_and_lease() {
        let executor = RefreshExecutor::new(2);
        executor.shutdown();
        let strategy = NonBlockingPrefetchStrategy::new(executor.clone());
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        strategy.prefetch(Box::new(move || flag.store(true, Ordering::SeqCst)));

        assert!(!strategy.is_prefetching());
        assert_eq!(executor.available_leases(), 2);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_updater_releases_resources_and_keeps_worker_alive() {
        let executor = RefreshExecutor::new(2);
        let strategy = NonBlockingPrefetchStrategy::new(executor.clone());

        strategy.prefetch(Box::new(|| panic!("producer blew up")));
        wait_until(|| !strategy.is_prefetching() && executor.available_leases() == 2);

        let (tx, rx) = mpsc::channel();
        strategy.prefetch(Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        executor.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_work() {
        let executor = RefreshExecutor::new(8);
        let done = Arc::new(AtomicUsize::new(0));
        let strategies: Vec<_> = (0..4)
            .map(|_| NonBlockingPrefetchStrategy::new(executor.clone()))
            .collect();
        for strategy in &strategies {
            let done = Arc::clone(&done);
            strategy.prefetch(Box::new(move || {
                thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        executor.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert!(executor.is_shut_down());
        executor.shutdown();
    }

    #[test]
    fn close_only_clears_the_instance_flag() {
        let executor = RefreshExecutor::new(3);
        let strategy = NonBlockingPrefetchStrategy::new(executor.clone());
        strategy.close();
        strategy.close();
        assert!(!strategy.is_prefetching());
        assert!(!executor.is_shut_down());
        assert_eq!(executor.available_leases(), 3);
    }
}
