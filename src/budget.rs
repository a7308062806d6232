//! Connection budget shared by the tunnel listener and the SOCKS5 server
//!
//! A counting semaphore with a fixed ceiling. Accept loops call
//! [`ConnectionBudget::try_acquire`] and reject the connection outright when
//! it returns `None`; the returned permit is held by the connection task and
//! gives its slot back when dropped.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded pool of concurrently active circuits
#[derive(Debug, Clone)]
pub struct ConnectionBudget {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
}

/// One occupied slot of a [`ConnectionBudget`]
#[derive(Debug)]
pub struct BudgetPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionBudget {
    /// Create a budget allowing `ceiling` concurrent circuits
    pub fn new(ceiling: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    /// Take a slot without waiting. `None` means the budget is exhausted.
    pub fn try_acquire(&self) -> Option<BudgetPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| BudgetPermit { _permit: permit })
    }

    /// Configured ceiling
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.ceiling - self.semaphore.available_permits()
    }
}
