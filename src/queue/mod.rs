//! In-memory download queue.
//!
//! The queue is the ordered collection of pending work items plus its
//! mutation protocol. It is deliberately not persisted: a process restart
//! loses pending items.
//!
//! # Overview
//!
//! - [`QueueStore`] - Thread-safe FIFO with the peek/pop-on-success protocol
//! - [`WorkItem`] - Individual queue entry, identified by sequence number
//! - [`ItemKind`] - Single file vs. expanded collection
//!
//! The head item is only removed after its fetch completes successfully
//! ([`QueueStore::pop_if_head`]), so a paused or cancelled attempt leaves the
//! queue exactly as it was before the attempt started.

mod item;

pub use item::{ItemKind, WorkItem};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Thread-safe FIFO of pending work items.
///
/// All operations are atomic with respect to each other; critical sections
/// only touch the in-memory sequence and never block on I/O.
#[derive(Debug, Default)]
pub struct QueueStore {
    items: Mutex<VecDeque<WorkItem>>,
    next_seq: AtomicU64,
}

impl QueueStore {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a new item and returns it.
    ///
    /// The caller validates the URL before constructing the item; the queue
    /// itself accepts anything and always succeeds.
    pub fn enqueue(&self, kind: ItemKind, url: impl Into<String>) -> WorkItem {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let item = WorkItem::new(seq, kind, url);
        self.lock().push_back(item.clone());
        debug!(seq, kind = %item.kind(), "enqueued item");
        item
    }

    /// Returns the first item without removing it.
    #[must_use]
    pub fn peek_head(&self) -> Option<WorkItem> {
        self.lock().front().cloned()
    }

    /// Removes the head only if it is still the given entry.
    ///
    /// Protects against a `clear` racing an in-flight fetch: when the entry
    /// is gone the call is a no-op and returns false.
    pub fn pop_if_head(&self, item: &WorkItem) -> bool {
        let mut items = self.lock();
        if items.front().is_some_and(|head| head.same_entry(item)) {
            items.pop_front();
            debug!(seq = item.seq(), "popped completed item");
            true
        } else {
            false
        }
    }

    /// Empties the queue unconditionally.
    ///
    /// Safe while a fetch is in flight: the in-flight item fails its later
    /// `pop_if_head` and drops out of the logical queue without re-appending.
    pub fn clear(&self) {
        let mut items = self.lock();
        let removed = items.len();
        items.clear();
        debug!(removed, "cleared queue");
    }

    /// Number of pending items, the in-flight head included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies the current contents in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkItem> {
        self.lock().iter().cloned().collect()
    }
}
