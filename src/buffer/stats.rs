/// Immutable snapshot of queue state and lifetime counters.
///
/// The three lifetime counters are disjoint: an event is counted `enqueued`
/// when accepted, and later exactly one of `dequeued` (handed to the
/// publisher) or `overflowed` (evicted to the overflow handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub enqueued: u64,
    pub dequeued: u64,
    pub overflowed: u64,
}

impl QueueStats {
    pub fn utilization_pct(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.len as f64 / self.capacity as f64) * 100.0
    }
}
