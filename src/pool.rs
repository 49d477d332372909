// Bounded worker pool shared by every aggregate call
// The semaphore caps outstanding upstream requests; the backstop caps each task once it holds a slot

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    backstop: Duration,
}

impl WorkerPool {
    pub fn new(capacity: usize, backstop: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            backstop,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn backstop(&self) -> Duration {
        self.backstop
    }

    pub fn idle_slots(&self) -> usize {
        self.permits.available_permits()
    }

    // None when the backstop elapsed; the abandoned task is dropped, which cancels its I/O
    pub async fn run<F, T>(&self, task: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await.ok()?;
        tokio::time::timeout(self.backstop, task).await.ok()
    }
}
