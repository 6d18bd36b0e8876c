//! Bounded in-memory queue between the producer and the publisher.
//!
//! Producers push from the host application's event thread; the publisher is
//! the single draining consumer. On overflow the oldest entries are evicted
//! through a registered handler instead of being silently dropped.

pub mod error;
pub mod queue;
pub mod stats;

pub use error::QueueError;
pub use queue::{BoundedQueue, OverflowHandler};
pub use stats::QueueStats;
