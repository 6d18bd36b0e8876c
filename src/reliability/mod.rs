//! Failure-mode machinery: durable spooling, retry backoff, circuit
//! breaking, collector health probing, and stalled-timer recovery.

pub mod circuit;
pub mod health;
pub mod power;
pub mod retry;
pub mod spool;
pub mod watchdog;

pub use circuit::{CircuitBreaker, CircuitConfig};
pub use health::{HealthConfig, HealthMonitor, HealthState};
pub use power::{ResumeConfig, ResumeEvent, ResumeMonitor};
pub use retry::RetryPolicy;
pub use spool::{EventSpool, SpoolConfig, SpoolError};
pub use watchdog::{WatchdogConfig, WatchdogTimer};
