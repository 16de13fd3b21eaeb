//! Single-flight gate
//!
//! One permit guards the model. Waiters are served in arrival order (tokio's
//! semaphore is fair), and a [`Ticket`] gives the permit back when dropped, so
//! every exit path, panics and cancelled futures included, releases it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The right to drive the model right now
#[derive(Debug)]
pub struct Ticket {
    _permit: OwnedSemaphorePermit,
    issued_at: Instant,
}

impl Ticket {
    /// How long this ticket has been held
    pub fn held_for(&self) -> Duration {
        self.issued_at.elapsed()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        tracing::debug!("Ticket released after {:?}", self.issued_at.elapsed());
    }
}

/// Capacity-one FIFO gate
#[derive(Debug, Clone)]
pub struct SingleFlight {
    gate: Arc<Semaphore>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Waits for the ticket; callers queue in arrival order
    pub async fn acquire(&self) -> Ticket {
        let permit = match self.gate.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The gate is never closed
            Err(_) => unreachable!("single-flight semaphore closed"),
        };
        Ticket {
            _permit: permit,
            issued_at: Instant::now(),
        }
    }

    /// Returns true while some caller holds the ticket
    pub fn is_held(&self) -> bool {
        self.gate.available_permits() == 0
    }

    /// Waits until the ticket is free, giving up after `timeout`
    ///
    /// Returns false on timeout. Queues like any other caller, so everyone
    /// already waiting is served first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.acquire()).await.is_ok()
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}
