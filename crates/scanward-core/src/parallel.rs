//! Bounded per-item parallelism inside a stage.
//!
//! Each item runs in its own spawned task, gated by a semaphore. Results are
//! collected in input order after join; a result that arrives after the run's
//! token was cancelled is discarded at that merge point.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::cancel::CancellationToken;

/// What became of one item's task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<R> {
    Completed(R),
    /// The token was cancelled before the result was merged.
    Cancelled,
    /// The task panicked; the message is the join error.
    Panicked(String),
}

impl<R> TaskOutcome<R> {
    pub fn completed(self) -> Option<R> {
        match self {
            Self::Completed(r) => Some(r),
            _ => None,
        }
    }
}

/// Run `task` over `items` with at most `max_concurrent` in flight.
///
/// Output is index-aligned with `items`.
pub async fn execute_bounded<T, R, F, Fut>(
    items: Vec<T>,
    max_concurrent: usize,
    cancel: &CancellationToken,
    task: F,
) -> Vec<TaskOutcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let task = Arc::new(task);
    let sem = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let task = Arc::clone(&task);
        let sem = Arc::clone(&sem);
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();

            // Do not start new external calls once the run is cancelled.
            if cancel.is_cancelled() {
                return None;
            }
            Some(task(item).await)
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = match handle.await {
            Ok(Some(result)) if !cancel.is_cancelled() => TaskOutcome::Completed(result),
            Ok(_) => TaskOutcome::Cancelled,
            Err(e) => {
                warn!(error = %e, "per-item task panicked");
                TaskOutcome::Panicked(e.to_string())
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn results_are_index_aligned() {
        let cancel = CancellationToken::new();
        let outcomes = execute_bounded(vec![30u64, 10, 20], 3, &cancel, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms * 2
        })
        .await;
        let values: Vec<u64> = outcomes.into_iter().filter_map(TaskOutcome::completed).collect();
        assert_eq!(values, vec![60, 20, 40]);
    }

    #[tokio::test]
    async fn concurrency_is_capped() {
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        execute_bounded((0..8).collect::<Vec<u32>>(), 2, &cancel, move |_| {
            let (f, p) = (Arc::clone(&f), Arc::clone(&p));
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                f.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_results_are_discarded() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let outcomes = execute_bounded(vec![1u32, 2], 1, &cancel, move |n| {
            let trigger = trigger.clone();
            async move {
                if n == 1 {
                    trigger.cancel();
                }
                n
            }
        })
        .await;
        assert!(outcomes.iter().all(|o| *o == TaskOutcome::Cancelled));
    }
}
