//! Quiet-period coalescing of raw input before it reaches the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

/// Coalesces bursts of input. Each call to [`Debouncer::settle`] supersedes
/// the previous one; only a value that survives a full quiet period is
/// returned.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn quiet(&self) -> Duration {
        self.quiet
    }

    /// Waits out the quiet period. Returns `None` when newer input arrived in
    /// the meantime.
    pub async fn settle<T>(&self, value: T) -> Option<T> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.quiet.is_zero() {
            tokio::time::sleep(self.quiet).await;
        }
        if self.generation.load(Ordering::SeqCst) == ticket {
            Some(value)
        } else {
            debug!(ticket, "input superseded during quiet period");
            None
        }
    }

    /// Drops any pending input without waiting.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
