//! Bounded worker pool for deployment batches
//!
//! Deployment work is blocking file-system work, so each task runs on the
//! blocking thread pool. A semaphore caps how many run at once.

use crate::error::{DeployError, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Runs batches of blocking tasks with bounded parallelism
#[derive(Debug, Clone)]
pub struct DeployPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl DeployPool {
    /// Pool running at most `size` tasks at once; zero is treated as one
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run every task and wait for all of them.
    ///
    /// Results come back in submission order. A panicking task yields
    /// [`DeployError::Join`] without affecting the others.
    pub async fn run_batch<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        debug!(tasks = tasks.len(), size = self.size, "Running deployment batch");

        let handles = tasks.into_iter().map(|task| {
            let permits = self.permits.clone();
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| DeployError::PoolClosed)?;
                tokio::task::spawn_blocking(task).await.map_err(DeployError::from)
            }
        });

        join_all(handles).await
    }
}

impl Default for DeployPool {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let pool = DeployPool::new(2);
        let tasks: Vec<_> = (0..5).map(|i| move || i * 10).collect();

        let results: Vec<i32> = pool
            .run_batch(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results, vec![0, 10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let pool = DeployPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        let results = pool.run_batch(tasks).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let pool = DeployPool::new(0);
        assert_eq!(pool.size(), 1);

        let tasks: Vec<Box<dyn FnOnce() -> u8 + Send>> = vec![
            Box::new(|| 1),
            Box::new(|| panic!("broken unit")),
            Box::new(|| 3),
        ];
        let results = pool.run_batch(tasks).await;

        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(matches!(results[1], Err(DeployError::Join(_))));
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }
}
