use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ResumeConfig {
    /// How often the monitor samples the monotonic clock.
    pub poll_interval: Duration,
    /// Gap beyond the poll interval that is read as a suspend/resume cycle.
    pub suspend_threshold: Duration,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            suspend_threshold: Duration::from_secs(10),
        }
    }
}

/// Raised once per detected suspend/resume cycle.
#[derive(Debug, Clone)]
pub struct ResumeEvent {
    /// Approximate instant the machine went to sleep (the last observed tick).
    pub suspended_at: DateTime<Utc>,
    pub resumed_at: DateTime<Utc>,
    pub suspended_for: Duration,
}

/// Detects OS suspend/resume by watching for gaps in a steady tick loop:
/// a sleeping machine cannot tick, so a wall-clock gap far beyond the poll
/// interval means the process just came back from suspension. The gap must
/// be measured on the wall clock — the monotonic clock pauses during
/// suspend on Linux and would read the whole sleep as one poll interval.
///
/// Consumers use the resumed signal to call `trigger_recovery()` on
/// watchdog timers and to force an immediate health check once the network
/// stack has had a moment to come back up.
pub struct ResumeMonitor {
    config: ResumeConfig,
    resumes: Arc<AtomicU64>,
    total_suspended: Arc<Mutex<Duration>>,
    event_tx: broadcast::Sender<ResumeEvent>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResumeMonitor {
    pub fn new(config: ResumeConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            config,
            resumes: Arc::new(AtomicU64::new(0)),
            total_suspended: Arc::new(Mutex::new(Duration::ZERO)),
            event_tx,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResumeEvent> {
        self.event_tx.subscribe()
    }

    pub fn resume_count(&self) -> u64 {
        self.resumes.load(Ordering::Relaxed)
    }

    pub fn total_suspended(&self) -> Duration {
        *self.total_suspended.lock()
    }

    /// Starts the tick loop. Calling twice has no additional effect.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let poll = self.config.poll_interval;
        let threshold = self.config.suspend_threshold;
        let resumes = Arc::clone(&self.resumes);
        let total_suspended = Arc::clone(&self.total_suspended);
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut last_wall = Utc::now();
            loop {
                tokio::time::sleep(poll).await;
                let now = Utc::now();
                // A backwards clock adjustment reads as a zero gap.
                let gap = (now - last_wall).to_std().unwrap_or(Duration::ZERO);
                if gap > poll + threshold {
                    let suspended_for = gap - poll;
                    let event = ResumeEvent {
                        suspended_at: last_wall,
                        resumed_at: now,
                        suspended_for,
                    };
                    resumes.fetch_add(1, Ordering::Relaxed);
                    *total_suspended.lock() += suspended_for;
                    tracing::warn!(
                        suspended_secs = suspended_for.as_secs(),
                        "system resume detected"
                    );
                    let _ = event_tx.send(event);
                }
                last_wall = now;
            }
        });
        *self.task.lock() = Some(handle);

        tracing::debug!("resume monitor started");
    }

    /// Stops the tick loop. Calling twice has no additional effect.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        tracing::debug!(
            resumes = self.resume_count(),
            "resume monitor stopped"
        );
    }
}

impl Drop for ResumeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
