//! Bounded concurrency guard.
//!
//! A counting semaphore with `max` permits, shared by every handler of one
//! server. The listener admits before it accepts, so at capacity new
//! connections wait in the OS backlog rather than in memory.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Proof of admission. Dropping it frees the slot.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGuard {
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            capacity: max,
        }
    }

    /// Wait for a free slot.
    pub async fn admit(&self) -> Admission {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("guard semaphore is never closed"));
        Admission { _permit: permit }
    }

    /// Take a slot only if one is free right now.
    pub fn try_admit(&self) -> Option<Admission> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Admission { _permit: permit })
    }

    /// Admitted handlers that have not released their slot yet.
    pub fn active(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
