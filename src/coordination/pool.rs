//! Bounded pool of concurrent tasks shared by chunk processing and reconciliation.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};

/// Fixed-capacity worker pool
///
/// Tasks are spawned immediately but only run their body while holding one of
/// `capacity` permits, so submissions beyond capacity queue instead of failing.
/// Closing the pool makes every queued and future task fail with `TaskFailed`.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_input("worker count must be at least 1"));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Spawn `task` onto `join_set`, gated by a pool permit
    pub fn spawn<T, F>(&self, join_set: &mut JoinSet<Result<T>>, task: F)
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        join_set.spawn(async move {
            // Permit is held for the whole task and released on drop
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::TaskFailed {
                    context: "worker pool is closed".to_string(),
                })?;
            task.await
        });
    }

    /// Shut the pool down; tasks still waiting for a permit fail
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Flatten a joined task result, turning panics and cancellations into errors
pub(crate) fn flatten_join<T>(
    joined: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(Error::TaskFailed {
            context: if e.is_panic() {
                format!("task panicked: {e}")
            } else {
                format!("task cancelled: {e}")
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let pool = WorkerPool::new(3).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut join_set = JoinSet::new();

        for _ in 0..20 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.spawn(&mut join_set, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let mut completed = 0;
        while let Some(joined) = join_set.join_next().await {
            flatten_join(joined).unwrap();
            completed += 1;
        }

        assert_eq!(completed, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_tasks() {
        let pool = WorkerPool::new(1).unwrap();
        pool.close();

        let mut join_set = JoinSet::new();
        pool.spawn(&mut join_set, async { Ok(1u32) });
        let joined = join_set.join_next().await.unwrap();
        assert!(matches!(flatten_join(joined), Err(Error::TaskFailed { .. })));
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        assert!(matches!(WorkerPool::new(0), Err(Error::InvalidInput { .. })));
    }
}
