//! Bounded pool for blocking handler work.
//!
//! # Design Decisions
//! - Runs closures on tokio's blocking threads, gated by a semaphore so a
//!   burst of slow handlers cannot exhaust the blocking pool
//! - A panic inside the closure becomes `HandlerError::Panicked`

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::HandlerError;

/// Shared handle to the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_blocking: usize,
}

impl WorkerPool {
    /// Create a pool running at most `max_blocking` closures at once.
    pub fn new(max_blocking: usize) -> Self {
        let max_blocking = max_blocking.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_blocking)),
            max_blocking,
        }
    }

    /// Run `task` on a blocking thread once a slot is free.
    pub async fn run<F, T>(&self, task: F) -> Result<T, HandlerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HandlerError::msg("worker pool closed"))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                HandlerError::from_panic(e.into_panic())
            } else {
                HandlerError::msg("worker task cancelled")
            }
        })
    }

    /// Slots not currently in use.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_blocking(&self) -> usize {
        self.max_blocking
    }
}
