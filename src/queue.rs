//! Bounded queue of encoded records awaiting persistence.
//!
//! Producers enqueue from any context, including interrupt context; a single
//! drain context consumes. The lock is held only across O(1) index moves,
//! never across a flash write. When the queue is full the newest record is
//! dropped and counted; the oldest context is usually the most valuable at
//! crash time.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::{Mutex, MutexGuard};

use crate::fault::SoleAccess;
use crate::record::EncodedRecord;

/// Default queue capacity (records).
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

struct QueueInner<const N: usize> {
    slots: [EncodedRecord; N],
    head: usize,
    count: usize,
}

impl<const N: usize> QueueInner<N> {
    const fn new() -> Self {
        Self {
            slots: [EncodedRecord::EMPTY; N],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, rec: &EncodedRecord) -> bool {
        if self.count == N {
            return false;
        }
        self.slots[(self.head + self.count) % N] = *rec;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<EncodedRecord> {
        if self.count == 0 {
            return None;
        }
        let rec = self.slots[self.head];
        self.head = (self.head + 1) % N;
        self.count -= 1;
        Some(rec)
    }
}

/// Fixed-capacity FIFO of [`EncodedRecord`] slots.
///
/// Drop-newest on overflow, with a dropped counter readable at any time.
pub struct LogQueue<const N: usize = DEFAULT_QUEUE_CAPACITY> {
    inner: Mutex<QueueInner<N>>,
    dropped: AtomicU32,
}

impl<const N: usize> LogQueue<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::new()),
            dropped: AtomicU32::new(0),
        }
    }

    /// Append a record. Never blocks beyond the short index-move lock.
    ///
    /// Returns false and counts a drop when the queue is full; the stored
    /// oldest records are left untouched.
    #[inline]
    pub fn enqueue(&self, rec: &EncodedRecord) -> bool {
        let ok = self.inner.lock().push(rec);
        if !ok {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Remove and return the oldest pending record.
    #[inline]
    pub fn drain_one(&self) -> Option<EncodedRecord> {
        self.inner.lock().pop()
    }

    /// Append a record while holding the sole-access token.
    ///
    /// Breaks any lock held by a context that will never resume before
    /// taking it, so the fault path cannot deadlock on a preempted producer.
    pub fn enqueue_exclusive(&self, rec: &EncodedRecord, token: &SoleAccess) -> bool {
        let ok = self.seize(token).push(rec);
        if !ok {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Consume the whole queue, oldest first. Fault-hook only.
    pub fn drain_all<'q>(&'q self, token: &SoleAccess) -> DrainAll<'q, N> {
        DrainAll {
            guard: self.seize(token),
        }
    }

    fn seize(&self, _token: &SoleAccess) -> MutexGuard<'_, QueueInner<N>> {
        // SAFETY: the token certifies no other context is running, so a
        // locked state can only be a leftover from an interrupted holder.
        unsafe { self.inner.force_unlock() };
        self.inner.lock()
    }

    /// Number of records waiting to be drained.
    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get count of records dropped on overflow.
    #[inline]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for LogQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator consuming the queue under the sole-access guard.
pub struct DrainAll<'q, const N: usize> {
    guard: MutexGuard<'q, QueueInner<N>>,
}

impl<'q, const N: usize> Iterator for DrainAll<'q, N> {
    type Item = EncodedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.guard.pop()
    }
}
