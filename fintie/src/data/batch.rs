//! Bounded-concurrency batch runner.
//!
//! Runs one async job per input with at most `concurrency` in flight and
//! returns every outcome correlated with the input that produced it. A
//! failed or panicking job never cancels its siblings.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// Outcome of one batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem<K, V> {
    /// Position in the input list
    pub index: usize,
    pub key: K,
    /// `None` when the job failed or panicked
    pub value: Option<V>,
}

/// Run `job` for every key with at most `concurrency` jobs in flight.
///
/// Results come back in input order regardless of completion order.
pub async fn fetch_batch<K, V, E, F, Fut>(
    keys: Vec<K>,
    concurrency: usize,
    job: F,
) -> Vec<BatchItem<K, V>>
where
    K: Clone + fmt::Debug,
    E: fmt::Display,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    let total = keys.len();
    let concurrency = concurrency.max(1);

    let mut items: Vec<BatchItem<K, V>> = stream::iter(keys.into_iter().enumerate())
        .map(|(index, key)| {
            let fut = AssertUnwindSafe(job(key.clone())).catch_unwind();
            async move {
                let value = match fut.await {
                    Ok(Ok(value)) => Some(value),
                    Ok(Err(e)) => {
                        warn!(item = ?key, error = %e, "Batch item failed");
                        None
                    }
                    Err(_) => {
                        warn!(item = ?key, "Batch item panicked");
                        None
                    }
                };
                BatchItem { index, key, value }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    items.sort_by_key(|item| item.index);

    let failed = items.iter().filter(|item| item.value.is_none()).count();
    if failed > 0 {
        warn!(total, failed, "Batch finished with failures");
    } else {
        debug!(total, "Batch finished");
    }

    items
}

/// Keep only the successful items as `(key, value)` pairs.
pub fn successes<K, V>(items: Vec<BatchItem<K, V>>) -> Vec<(K, V)> {
    items
        .into_iter()
        .filter_map(|item| item.value.map(|value| (item.key, value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_follow_input_order() {
        // Later keys finish first
        let items = fetch_batch(vec![30u64, 20, 10, 0], 4, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(ms * 2)
        })
        .await;

        let keys: Vec<u64> = items.iter().map(|i| i.key).collect();
        assert_eq!(keys, vec![30, 20, 10, 0]);
        assert_eq!(items[0].value, Some(60));
        assert_eq!(items[3].index, 3);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let items = fetch_batch(vec![1, 2, 3, 4, 5], 2, |n| async move {
            if n % 2 == 0 {
                Err(format!("item {n} failed"))
            } else {
                Ok(n * 10)
            }
        })
        .await;

        assert_eq!(items.len(), 5);
        assert_eq!(
            successes(items),
            vec![(1, 10), (3, 30), (5, 50)]
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let items = fetch_batch(vec!["ok", "boom"], 2, |key| async move {
            if key == "boom" {
                panic!("adapter bug");
            }
            Ok::<_, String>(key.len())
        })
        .await;

        assert_eq!(items[0].value, Some(2));
        assert_eq!(items[1].value, None);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items = fetch_batch((0..12).collect(), 3, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await;

        assert_eq!(items.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let items = fetch_batch(vec![1], 0, |n| async move { Ok::<_, String>(n) }).await;
        assert_eq!(items[0].value, Some(1));
    }
}
