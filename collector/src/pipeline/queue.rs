//! Bounded drop-oldest batch queue.
//!
//! Each (exporter, signal) destination owns one queue with a single consuming
//! worker. Producers never wait: when the queue is full the oldest batch is
//! evicted to make room for the new one.

use shared::models::Batch;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Result of offering a batch to a queue.
#[derive(Debug)]
pub enum PushOutcome {
    /// The batch was queued without evicting anything.
    Queued,
    /// The batch was queued and the returned oldest batch was evicted.
    Evicted(Batch),
    /// The queue is closed; the batch is handed back.
    Closed(Batch),
}

#[derive(Debug, Default)]
struct QueueState {
    batches: VecDeque<Batch>,
    closed: bool,
}

/// A bounded FIFO of batches.
#[derive(Debug)]
pub struct BatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl BatchQueue {
    /// Creates a queue holding at most `capacity` batches (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a batch, evicting the oldest one if the queue is full.
    pub fn push(&self, batch: Batch) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed(batch);
            }
            let evicted = if state.batches.len() >= self.capacity {
                state.batches.pop_front()
            } else {
                None
            };
            state.batches.push_back(batch);
            evicted.map_or(PushOutcome::Queued, PushOutcome::Evicted)
        };
        self.notify.notify_one();
        outcome
    }

    /// Waits for the next batch.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Batch> {
        loop {
            {
                let mut state = self.lock();
                if let Some(batch) = state.batches.pop_front() {
                    return Some(batch);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stops accepting batches. Already queued batches can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    /// Removes and returns every queued batch without waiting.
    pub fn drain(&self) -> Vec<Batch> {
        self.lock().batches.drain(..).collect()
    }

    /// Number of queued batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().batches.len()
    }

    /// Returns true if no batch is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued batches.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
