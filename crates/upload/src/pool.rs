//! Bounded worker pool.

use std::future::Future;

use bytelift_transfer::CancellationRegistry;
use futures_util::future::try_join_all;
use tracing::debug;

use crate::error::UploadError;

/// Runs `count` workers concurrently on the calling task.
///
/// Each worker receives its index. The first worker to fail cancels
/// `registry`, which aborts in-flight siblings, and its error is returned.
/// On success the per-worker results are returned in worker order.
pub async fn run_workers<F, Fut, T>(
    count: usize,
    registry: &CancellationRegistry,
    worker: F,
) -> Result<Vec<T>, UploadError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let workers = (0..count.max(1)).map(|index| {
        let run = worker(index);
        async move {
            match run.await {
                Ok(value) => Ok(value),
                Err(err) => {
                    debug!(worker = index, error = %err, "worker failed; cancelling siblings");
                    registry.cancel();
                    Err(err)
                }
            }
        }
    });
    try_join_all(workers).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn all_workers_run() {
        let registry = CancellationRegistry::new();
        let results = run_workers(3, &registry, |i| async move { Ok(i * 10) })
            .await
            .unwrap();
        assert_eq!(results, vec![0, 10, 20]);
        assert!(!registry.is_cancelled());
    }

    #[tokio::test]
    async fn zero_count_runs_one_worker() {
        let registry = CancellationRegistry::new();
        let results = run_workers(0, &registry, |i| async move { Ok(i) }).await.unwrap();
        assert_eq!(results, vec![0]);
    }

    #[tokio::test]
    async fn workers_interleave() {
        let registry = CancellationRegistry::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        run_workers(4, &registry, |_| {
            let (inside, peak) = (Arc::clone(&inside), Arc::clone(&peak));
            async move {
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failure_cancels_registry_once_and_short_circuits() {
        let registry = CancellationRegistry::new();
        let aborted = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&aborted);
        let _guard = registry.add_handler(move || {
            a.fetch_add(1, Ordering::SeqCst);
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            run_workers(2, &registry, |i| async move {
                if i == 1 {
                    return Err(UploadError::PartUploadFailed {
                        part_index: 1,
                        reason: "HTTP 500".into(),
                    });
                }
                // Would never finish on its own.
                std::future::pending::<Result<(), UploadError>>().await
            }),
        )
        .await
        .expect("pool should short-circuit")
        .unwrap_err();

        assert!(matches!(err, UploadError::PartUploadFailed { part_index: 1, .. }));
        assert!(registry.is_cancelled());
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }
}
