//! Admission gate bounding how many conversion jobs execute at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::error::JobError;
use crate::telemetry;

/// Fixed-capacity slot pool.
///
/// Cloning is cheap and every clone shares the same slots.
#[derive(Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
}

/// One held unit of gate capacity. The slot returns to the pool on drop.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Keeps `waiting` accurate even if an acquire future is dropped mid-wait.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionGate {
    /// Creates a gate with `capacity` slots. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits until a slot is free and takes it.
    ///
    /// There is no timeout. Waiters are served in the semaphore's FIFO order.
    ///
    /// # Errors
    ///
    /// Only if the underlying semaphore was closed, which this type never does.
    pub async fn acquire(&self) -> Result<Slot, JobError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);

        // Advisory only: the permit below is the real gate, and the pool may
        // free up between this check and the acquire.
        if self.available() == 0 {
            let waiting = self.waiting();
            info!(waiting, capacity = self.capacity, "Gate is full, waiting for a slot");
            telemetry::record_gate_pressure(waiting, self.capacity);
        }

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| JobError::Internal(format!("admission gate closed: {e}")))?;

        debug!(in_use = self.in_use(), "Slot acquired");
        Ok(Slot { _permit: permit })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Slots currently held by running jobs.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Jobs currently inside `acquire`, including one about to be granted.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
