//! Coalescing timer

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Runs an action once `delay` after the first of a burst of triggers.
///
/// The background task is aborted when the debouncer is dropped.
pub struct Debouncer {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

struct Shared {
    pending: AtomicBool,
    runs: AtomicU64,
    wake: Notify,
}

impl Debouncer {
    pub fn spawn<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            wake: Notify::new(),
        });

        let worker = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            loop {
                worker.wake.notified().await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                // triggers from here on schedule a new run
                worker.pending.store(false, Ordering::SeqCst);
                action().await;
                worker.runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        Debouncer { shared, task }
    }

    /// Request a run. No-op if one is already pending.
    pub fn trigger(&self) {
        if !self.shared.pending.swap(true, Ordering::SeqCst) {
            self.shared.wake.notify_one();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Number of completed runs
    pub fn runs(&self) -> u64 {
        self.shared.runs.load(Ordering::SeqCst)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
