use std::future::Future;

use tokio::sync::Mutex;

/// Async mutual exclusion around a critical section.
///
/// Waiters are served in FIFO order. The lock is not reentrant: calling
/// [`run_exclusive`](Self::run_exclusive) on the same lock from inside its
/// own critical section never completes.
#[derive(Debug, Default)]
pub struct ExclusiveLock {
    inner: Mutex<()>,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` once no other caller holds the lock.
    ///
    /// The lock is released when `f` finishes, returns an error, panics, or
    /// when the returned future is dropped.
    pub async fn run_exclusive<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _held = self.inner.lock().await;
        f().await
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
