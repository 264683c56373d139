//! Bounded worker pool for per-item fetches inside a single task.
//!
//! The pool is owned by the application context and handed to strategies;
//! a strategy asks for a lane count (the task's `max_workers`) and the pool
//! clamps it to the configured cap. Results are yielded in completion order,
//! not submission order.

use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    cap: usize,
}

impl WorkerPool {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1) }
    }

    /// Effective worker count for a requested `max_workers` (at least 1).
    pub fn lanes(&self, requested: usize) -> usize {
        requested.clamp(1, self.cap)
    }

    /// Run `job` over `items` with at most `lanes(max_workers)` in flight,
    /// keeping the `Some` results.
    pub async fn run<I, T, R, F, Fut>(&self, max_workers: usize, items: I, job: F) -> Vec<R>
    where
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Option<R>>,
    {
        let lanes = self.lanes(max_workers);
        debug!(lanes, "Dispatching work to pool");
        stream::iter(items)
            .map(job)
            .buffer_unordered(lanes)
            .filter_map(|r| async move { r })
            .collect()
            .await
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_lanes_clamped() {
        let pool = WorkerPool::new(4);
        assert_eq!(pool.lanes(0), 1);
        assert_eq!(pool.lanes(3), 3);
        assert_eq!(pool.lanes(64), 4);
    }

    #[tokio::test]
    async fn test_run_drops_none_results() {
        let pool = WorkerPool::new(4);
        let mut out = pool
            .run(2, 0..10u32, |i| async move { (i % 2 == 0).then_some(i) })
            .await;
        out.sort();
        assert_eq!(out, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_lanes() {
        let pool = WorkerPool::new(8);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = pool
            .run(3, 0..12u32, |i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Some(i)
                }
            })
            .await;

        assert_eq!(out.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
