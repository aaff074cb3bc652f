//! Per-stage run generations and cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Run bookkeeping for one pipeline stage.
///
/// Every run takes a [`Ticket`]. Starting a run cancels the token of the
/// previous one, and only the holder of the newest generation may publish.
#[derive(Debug)]
pub struct Stage {
    name: &'static str,
    generation: AtomicU64,
    token: Mutex<CancellationToken>,
}

/// Handed to one stage run.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub generation: u64,
    pub token: CancellationToken,
}

impl Stage {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: AtomicU64::new(0),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Start a new run, superseding whatever is in flight.
    pub fn begin(&self) -> Ticket {
        let token = CancellationToken::new();
        let mut slot = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = std::mem::replace(&mut *slot, token.clone());
        drop(slot);
        previous.cancel();
        tracing::debug!(stage = self.name, generation, "stage run started");
        Ticket { generation, token }
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}
