use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Cadence of the primary callback.
    pub interval: Duration,
    /// Stall threshold as a multiple of the interval.
    pub stall_factor: f64,
}

impl WatchdogConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stall_factor: 2.5,
        }
    }

    fn stall_threshold(&self) -> Duration {
        self.interval.mul_f64(self.stall_factor)
    }
}

struct Shared {
    callback: Box<dyn Fn() + Send + Sync>,
    last_tick: Mutex<Instant>,
    ticks: AtomicU64,
    recoveries: AtomicU64,
    running: AtomicBool,
    primary: Mutex<Option<JoinHandle<()>>>,
}

/// A periodic callback that supervises itself.
///
/// The primary task ticks at the configured interval and records a last-tick
/// timestamp; a secondary task at half the interval recreates the primary
/// from scratch whenever now − last-tick exceeds 2.5× the interval — the
/// symptom of a stalled timer after OS sleep/resume or a starved pool.
pub struct WatchdogTimer {
    name: String,
    config: WatchdogConfig,
    shared: Arc<Shared>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl WatchdogTimer {
    pub fn new<F>(name: impl Into<String>, config: WatchdogConfig, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            config,
            shared: Arc::new(Shared {
                callback: Box::new(callback),
                last_tick: Mutex::new(Instant::now()),
                ticks: AtomicU64::new(0),
                recoveries: AtomicU64::new(0),
                running: AtomicBool::new(false),
                primary: Mutex::new(None),
            }),
            watchdog: Mutex::new(None),
        }
    }

    /// Starts both timers. Calling twice has no additional effect.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.shared.last_tick.lock() = Instant::now();
        Self::spawn_primary(&self.shared, self.config.interval);

        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        let interval = self.config.interval;
        let threshold = self.config.stall_threshold();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval / 2).await;
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                let stalled_for = shared.last_tick.lock().elapsed();
                if stalled_for > threshold {
                    tracing::warn!(
                        timer = %name,
                        stalled_ms = stalled_for.as_millis() as u64,
                        "primary timer stalled, recreating"
                    );
                    Self::recover(&shared, interval);
                }
            }
        });
        *self.watchdog.lock() = Some(handle);

        tracing::debug!(timer = %self.name, interval_ms = self.config.interval.as_millis() as u64, "watchdog timer started");
    }

    /// Stops both timers and logs final counters. Calling twice has no
    /// additional effect.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.shared.primary.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.watchdog.lock().take() {
            handle.abort();
        }
        tracing::info!(
            timer = %self.name,
            ticks = self.tick_count(),
            recoveries = self.recovery_count(),
            "watchdog timer stopped"
        );
    }

    /// Forces recreation of the primary timer without waiting for the
    /// watchdog's own detection latency (e.g. on an OS resume signal).
    pub fn trigger_recovery(&self) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        tracing::info!(timer = %self.name, "external recovery triggered");
        Self::recover(&self.shared, self.config.interval);
    }

    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    pub fn recovery_count(&self) -> u64 {
        self.shared.recoveries.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn recover(shared: &Arc<Shared>, interval: Duration) {
        if let Some(handle) = shared.primary.lock().take() {
            handle.abort();
        }
        *shared.last_tick.lock() = Instant::now();
        shared.recoveries.fetch_add(1, Ordering::Relaxed);
        Self::spawn_primary(shared, interval);
    }

    fn spawn_primary(shared: &Arc<Shared>, interval: Duration) {
        let task_shared = Arc::clone(shared);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !task_shared.running.load(Ordering::SeqCst) {
                    break;
                }
                *task_shared.last_tick.lock() = Instant::now();
                (task_shared.callback)();
                task_shared.ticks.fetch_add(1, Ordering::Relaxed);
            }
        });
        *shared.primary.lock() = Some(handle);
    }
}

impl Drop for WatchdogTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
