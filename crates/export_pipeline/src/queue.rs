//! Bounded Queue - Reject-on-Full FIFO Between Producers and the Worker
//!
//! Producers append under a single mutex; the export worker drains batches
//! from the front under the same mutex. Nothing else runs while it is held.
//!
//! Once [`close`](BoundedQueue::close) has been called every later `push` is
//! rejected, so a final drain taken after closing sees every record that will
//! ever be admitted.

use crate::invariants::{debug_assert_batch_bounded, debug_assert_bounded_len};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Slots<R> {
    items: VecDeque<R>,
    closed: bool,
}

/// FIFO queue with a hard capacity, shared by producers and the export worker.
#[derive(Debug)]
pub struct BoundedQueue<R> {
    slots: Mutex<Slots<R>>,
    capacity: usize,
}

impl<R> BoundedQueue<R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<R>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `record` unless the queue is full or closed.
    ///
    /// Returns the queue length after admission, or hands the record back
    /// when rejected.
    pub fn push(&self, record: R) -> Result<usize, R> {
        let mut slots = self.lock();
        if slots.closed || slots.items.len() >= self.capacity {
            return Err(record);
        }
        slots.items.push_back(record);
        let len = slots.items.len();
        debug_assert_bounded_len!(len, self.capacity);
        Ok(len)
    }

    /// Removes and returns up to `max` records from the front.
    pub fn take_batch(&self, max: usize) -> Vec<R> {
        let mut slots = self.lock();
        let n = slots.items.len().min(max);
        let batch: Vec<R> = slots.items.drain(..n).collect();
        debug_assert_batch_bounded!(batch.len(), max);
        batch
    }

    /// Rejects every later `push`. Records already queued stay drainable.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
