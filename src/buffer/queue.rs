use super::error::QueueError;
use super::stats::QueueStats;
use crate::domain::AuditEvent;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives entries evicted on overflow. Must not block: it runs on the
/// producer's thread right after the queue lock is released.
pub type OverflowHandler = Box<dyn Fn(AuditEvent) + Send + Sync>;

/// Thread-safe FIFO bounded at a fixed capacity.
///
/// `enqueue` always accepts; once the bound is exceeded the oldest entries
/// are evicted in a loop and passed to the overflow handler, so the size
/// invariant holds even with many concurrent producers pushing past it.
/// No operation blocks and no lock is held while the handler runs.
pub struct BoundedQueue {
    entries: Mutex<VecDeque<AuditEvent>>,
    overflow_handler: RwLock<Option<OverflowHandler>>,
    capacity: usize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    overflowed: AtomicU64,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidCapacity { capacity });
        }

        Ok(Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            overflow_handler: RwLock::new(None),
            capacity,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        })
    }

    /// Registers the callback invoked with each entry evicted on overflow.
    /// Without a handler, evicted entries are dropped with a warning.
    pub fn set_overflow_handler<F>(&self, handler: F)
    where
        F: Fn(AuditEvent) + Send + Sync + 'static,
    {
        *self.overflow_handler.write() = Some(Box::new(handler));
    }

    /// Appends `event`, evicting oldest entries while the bound is exceeded.
    pub fn enqueue(&self, event: AuditEvent) {
        let evicted = {
            let mut entries = self.entries.lock();
            entries.push_back(event);

            let mut evicted = Vec::new();
            while entries.len() > self.capacity {
                if let Some(oldest) = entries.pop_front() {
                    evicted.push(oldest);
                }
            }
            evicted
        };

        self.enqueued.fetch_add(1, Ordering::Relaxed);

        if evicted.is_empty() {
            return;
        }
        self.overflowed
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);

        let handler = self.overflow_handler.read();
        match handler.as_ref() {
            Some(handler) => {
                for event in evicted {
                    handler(event);
                }
            }
            None => {
                tracing::warn!(
                    dropped = evicted.len(),
                    "queue overflow with no handler registered, evicted events dropped"
                );
            }
        }
    }

    /// Removes and returns up to `max_count` oldest entries. Never blocks;
    /// returns an empty vec immediately when the queue is empty.
    pub fn dequeue_batch(&self, max_count: usize) -> Vec<AuditEvent> {
        if max_count == 0 {
            return Vec::new();
        }

        let batch: Vec<AuditEvent> = {
            let mut entries = self.entries.lock();
            let take = max_count.min(entries.len());
            entries.drain(..take).collect()
        };

        self.dequeued
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    /// Single-item non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<AuditEvent> {
        let event = self.entries.lock().pop_front();
        if event.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        event
    }

    /// Clones the oldest entry without removing it.
    pub fn try_peek(&self) -> Option<AuditEvent> {
        self.entries.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BoundedQueue")
            .field("len", &stats.len)
            .field("capacity", &stats.capacity)
            .field("enqueued", &stats.enqueued)
            .field("dequeued", &stats.dequeued)
            .field("overflowed", &stats.overflowed)
            .finish()
    }
}
