use crate::sender::CollectorClient;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Snapshot of the collector's observed liveness.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    /// `None` until the first probe completes.
    pub healthy: Option<bool>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
}

/// Probes the collector's liveness endpoint on a fixed cadence, independent
/// of the publish path, so status is known even when nothing is queued.
///
/// The status-changed signal is edge-triggered: subscribers are notified
/// only when the healthy boolean flips (the first determination counts as a
/// flip from unknown).
pub struct HealthMonitor {
    client: CollectorClient,
    config: HealthConfig,
    state: Arc<Mutex<HealthState>>,
    status_tx: broadcast::Sender<bool>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(client: CollectorClient, config: HealthConfig) -> Self {
        let (status_tx, _) = broadcast::channel(16);
        Self {
            client,
            config,
            state: Arc::new(Mutex::new(HealthState::default())),
            status_tx,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    /// Receiver for edge-triggered status changes, carrying the new boolean.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> HealthState {
        self.state.lock().clone()
    }

    pub fn is_healthy(&self) -> Option<bool> {
        self.state.lock().healthy
    }

    /// Starts the probe loop with an immediate out-of-band first check.
    /// Calling twice has no additional effect.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let client = self.client.clone();
        let interval = self.config.check_interval;
        let state = Arc::clone(&self.state);
        let status_tx = self.status_tx.clone();

        let handle = tokio::spawn(async move {
            Self::probe_once(&client, &state, &status_tx).await;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = token.cancelled() => break,
                }
                Self::probe_once(&client, &state, &status_tx).await;
            }
        });
        *self.task.lock() = Some(handle);

        tracing::info!(interval_secs = interval.as_secs(), "health monitor started");
    }

    /// Stops the probe loop. Calling twice has no additional effect.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().cancel();
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        tracing::info!("health monitor stopped");
    }

    /// One out-of-band check, e.g. after an OS resume.
    pub async fn check_now(&self) {
        Self::probe_once(&self.client, &self.state, &self.status_tx).await;
    }

    async fn probe_once(
        client: &CollectorClient,
        state: &Mutex<HealthState>,
        status_tx: &broadcast::Sender<bool>,
    ) {
        let healthy = client.check_health().await;
        let now = Utc::now();

        let flipped = {
            let mut state = state.lock();
            let previous = state.healthy;
            state.last_check = Some(now);
            if healthy {
                state.consecutive_successes += 1;
                state.consecutive_failures = 0;
                state.last_success = Some(now);
            } else {
                state.consecutive_failures += 1;
                state.consecutive_successes = 0;
                state.last_failure = Some(now);
            }
            state.healthy = Some(healthy);
            previous != Some(healthy)
        };

        if flipped {
            tracing::info!(healthy, "collector health changed");
            // No receivers is fine; the signal is best-effort.
            let _ = status_tx.send(healthy);
        } else {
            tracing::debug!(healthy, "collector health unchanged");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
