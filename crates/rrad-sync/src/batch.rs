use std::future::Future;
use std::time::Duration;

use futures::future::join_all;

/// Fan-out limits for origin API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 4,
            inter_batch_delay: Duration::from_millis(500),
        }
    }
}

/// Run `op` over `items` in fixed-size batches.
///
/// Each batch runs concurrently and settles completely before the next one
/// starts; a failure only affects its own slot. `inter_batch_delay` is slept
/// between batches, never after the last one. Results are paired with their
/// input and returned in input order.
pub async fn run_in_batches<I, T, E, F, Fut>(
    items: &[I],
    policy: &BatchPolicy,
    mut op: F,
) -> Vec<(I, Result<T, E>)>
where
    I: Clone,
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let size = policy.batch_size.max(1);
    let batches = items.len().div_ceil(size);
    let mut settled = Vec::with_capacity(items.len());

    for (batch_index, batch) in items.chunks(size).enumerate() {
        let results = join_all(batch.iter().cloned().map(&mut op)).await;
        settled.extend(batch.iter().cloned().zip(results));

        if batch_index + 1 < batches && !policy.inter_batch_delay.is_zero() {
            tokio::time::sleep(policy.inter_batch_delay).await;
        }
    }

    settled
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn batches_are_separated_by_the_delay_only_between_batches() {
        let policy = BatchPolicy {
            batch_size: 4,
            inter_batch_delay: Duration::from_millis(500),
        };
        let items: Vec<u32> = (0..9).collect();

        let started = Instant::now();
        let results = run_in_batches(&items, &policy, |n| async move { Ok::<_, ()>(n * 2) }).await;

        // three batches, two gaps
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(results.len(), 9);
        assert_eq!(results[8], (8, Ok(16)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_batch_size() {
        let policy = BatchPolicy {
            batch_size: 3,
            inter_batch_delay: Duration::from_millis(10),
        };
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..10).collect();

        run_in_batches(&items, &policy, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_its_siblings() {
        let items = vec!["a", "boom", "c"];
        let results = run_in_batches(&items, &BatchPolicy::default(), |id| async move {
            if id == "boom" {
                Err(format!("failed {id}"))
            } else {
                Ok(id.to_uppercase())
            }
        })
        .await;

        assert_eq!(results[0].1, Ok("A".to_string()));
        assert!(results[1].1.is_err());
        assert_eq!(results[2].1, Ok("C".to_string()));
    }

    #[tokio::test]
    async fn empty_input_runs_nothing() {
        let items: Vec<u8> = Vec::new();
        let results = run_in_batches(&items, &BatchPolicy::default(), |n| async move { Ok::<_, ()>(n) }).await;
        assert!(results.is_empty());
    }
}
