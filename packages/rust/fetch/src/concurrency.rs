//! Bounded in-flight work with FIFO admission.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

use webmark_shared::{Result, WebmarkError};

/// Caps how many tasks run at once. Waiters are admitted in arrival order.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max: usize,
    semaphore: Semaphore,
    pending: AtomicUsize,
}

/// Decrements the pending counter even if the waiting future is dropped.
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrency: usize) -> Self {
        let max = max_concurrency.max(1);
        Self {
            max,
            semaphore: Semaphore::new(max),
            pending: AtomicUsize::new(0),
        }
    }

    /// Run `task` once a slot is free. The slot is released when the task
    /// finishes, whether it succeeded or not.
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let permit = {
            self.pending.fetch_add(1, Ordering::SeqCst);
            let _guard = PendingGuard(&self.pending);
            self.semaphore
                .acquire()
                .await
                .map_err(|_| WebmarkError::Closed("concurrency limiter"))?
        };

        let result = task.await;
        drop(permit);
        result
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        if self.semaphore.is_closed() {
            return 0;
        }
        self.max - self.semaphore.available_permits()
    }

    /// Tasks waiting for a slot.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max
    }

    /// Refuse new work. Waiters and later callers get [`WebmarkError::Closed`];
    /// tasks already running finish normally.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
