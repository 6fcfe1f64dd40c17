//! Debounced expiry notification buffer.
//!
//! When an upstream outage knocks a batch of accounts offline, the push
//! channel delivers one event per account in a burst. The buffer
//! accumulates display names and flushes a single aggregated batch once
//! the burst has been quiet for the full window -- every new arrival
//! restarts the timer.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

struct BufferState {
    names: Vec<String>,
    /// Bumped on every arrival; a flush timer only fires if its
    /// generation is still current, which is what restarts the window.
    generation: u64,
}

/// Accumulator for expired-account names with a trailing-edge debounce.
///
/// Flushed batches are delivered on the receiver returned by
/// [`ExpiryBuffer::new`]; the monitor forwards them as one aggregated
/// notification event.
#[derive(Clone)]
pub struct ExpiryBuffer {
    window: Duration,
    state: Arc<Mutex<BufferState>>,
    flush_tx: mpsc::UnboundedSender<Vec<String>>,
}

impl ExpiryBuffer {
    /// Create a buffer flushing `window` after the last arrival.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<Vec<String>>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let buffer = Self {
            window,
            state: Arc::new(Mutex::new(BufferState {
                names: Vec::new(),
                generation: 0,
            })),
            flush_tx,
        };
        (buffer, flush_rx)
    }

    /// Append a display name (deduplicated) and restart the flush timer.
    pub fn push(&self, name: impl Into<String>) {
        let name = name.into();
        let generation = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.names.contains(&name) {
                state.names.push(name);
            }
            state.generation += 1;
            state.generation
        };

        let state = Arc::clone(&self.state);
        let flush_tx = self.flush_tx.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let batch = {
                let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                // A newer arrival restarted the window; let its timer flush.
                if guard.generation != generation || guard.names.is_empty() {
                    return;
                }
                std::mem::take(&mut guard.names)
            };

            let _ = flush_tx.send(batch);
        });
    }

    /// Names currently waiting to flush.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .names
            .len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
