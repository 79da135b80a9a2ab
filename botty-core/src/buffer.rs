// ABOUTME: FIFO buffer of inbound events not yet delivered to the dispatch loop
// ABOUTME: Supports non-destructive peek (correlation waits) and destructive drain (dispatch)

use crate::event::Event;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// The unprocessed event buffer.
///
/// Cloning yields another handle to the same queue, so a background input source can
/// push events while the control loop peeks and drains. Peeking never removes an
/// event; only [`EventBuffer::drain_all`] does.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    inner: Arc<Mutex<VecDeque<Event>>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a producer panicked mid-push; the queue itself is intact.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, event: Event) {
        self.lock().push_back(event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = Event>) {
        self.lock().extend(events);
    }

    /// Snapshot of every buffered event in arrival order, leaving the buffer untouched
    pub fn peek_all(&self) -> Vec<Event> {
        self.lock().iter().cloned().collect()
    }

    /// Find the first buffered event matching `predicate` without removing anything
    pub fn peek_find<T>(&self, mut predicate: impl FnMut(&Event) -> Option<T>) -> Option<T> {
        self.lock().iter().find_map(|event| predicate(event))
    }

    /// Remove and return every buffered event in arrival order
    pub fn drain_all(&self) -> Vec<Event> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
