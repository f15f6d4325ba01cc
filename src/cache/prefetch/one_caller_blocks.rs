use super::{PrefetchStrategy, Updater};
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs the prefetch on the thread that noticed it was due.
///
/// While one caller is refreshing, other callers skip the prefetch and return
/// the current value immediately. The flag check and the flag set are separate
/// operations, so two callers racing on the very first check can both run the
/// updater; the cache's refresh lock and its double-check keep the producer
/// from being called twice for the same window.
#[derive(Debug, Default)]
pub struct OneCallerBlocksPrefetchStrategy {
    currently_refreshing: AtomicBool,
}

impl OneCallerBlocksPrefetchStrategy {
    /// Creates a strategy with no refresh in flight.
    pub const fn new() -> Self {
        Self {
            currently_refreshing: AtomicBool::new(false),
        }
    }

    /// Returns `true` while a caller is running the updater.
    pub fn is_refreshing(&self) -> bool {
        self.currently_refreshing.load(Ordering::Acquire)
    }
}

// Clears the flag on every exit path, including a panicking updater.
struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PrefetchStrategy for OneCallerBlocksPrefetchStrategy {
    fn prefetch(&self, updater: Updater) {
        if self.currently_refreshing.load(Ordering::Acquire) {
            return;
        }
        self.currently_refreshing.store(true, Ordering::Release);
        let _clear = ClearOnDrop(&self.currently_refreshing);
        updater();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Arc};
    use std::thread;

    #[test]
    fn runs_updater_on_calling_thread() {
        let strategy = OneCallerBlocksPrefetchStrategy::new();
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        strategy.prefetch(Box::new(move || tx.send(thread::current().id()).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), caller);
        assert!(!strategy.is_refreshing());
    }

    #[test]
    fn skips_while_another_caller_is_refreshing() {
        let strategy = Arc::new(OneCallerBlocksPrefetchStrategy::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = {
            let strategy = Arc::clone(&strategy);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                strategy.prefetch(Box::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                }));
            })
        };

        entered_rx.recv().unwrap();
        let skipped = Arc::clone(&calls);
        strategy.prefetch(Box::new(move || {
            skipped.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release_tx.send(()).unwrap();
        worker.join().unwrap();
        assert!(!strategy.is_refreshing());
    }

    #[test]
    fn flag_is_cleared_when_updater_panics() {
        let strategy = OneCallerBlocksPrefetchStrategy::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            strategy.prefetch(Box::new(|| panic!("producer blew up")));
        }));
        assert!(result.is_err());
        assert!(!strategy.is_refreshing());
    }

    #[test]
    fn close_is_idempotent() {
        let strategy = OneCallerBlocksPrefetchStrategy::new();
        strategy.close();
        strategy.close();
        assert!(!strategy.is_refreshing());
    }
}
