//! Bounded admission for external process invocations.
//!
//! Every call into the store tool (create, update, render) goes through a single
//! [`ConcurrencyLimiter`], so the number of live `rrdtool` child processes never
//! exceeds the configured capacity no matter how many plugins are attached.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

/// Default number of concurrent store invocations.
pub const DEFAULT_CAPACITY: usize = 10;

/// Errors raised when building a limiter.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// Capacity must admit at least one caller.
    #[error("concurrency limiter capacity must be at least 1")]
    ZeroCapacity,
}

/// Semaphore-backed limiter around arbitrary async operations.
///
/// Cloning is cheap and every clone shares the same slots. A capacity of 1
/// turns the limiter into an async mutex.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter with `capacity` slots.
    ///
    /// # Errors
    /// Returns [`LimiterError::ZeroCapacity`] when `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self, LimiterError> {
        if capacity == 0 {
            return Err(LimiterError::ZeroCapacity);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Configured number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait for a slot, run `operation`, and release the slot when it settles.
    ///
    /// The output of `operation` is returned untouched, so a failing operation
    /// still yields its own error. Dropping the returned future while it waits
    /// or runs releases the slot as well.
    pub async fn run<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed; the permit lives until the end of scope.
        let _permit = self.semaphore.acquire().await;
        operation.await
    }
}
