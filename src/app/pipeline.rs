use super::config::{Config, ConfigError};
use crate::buffer::{BoundedQueue, QueueError, QueueStats};
use crate::domain::{AuditEvent, SessionContext};
use crate::publisher::{Publisher, PublisherStats};
use crate::reliability::{
    CircuitBreaker, EventSpool, HealthMonitor, HealthState, ResumeMonitor, SpoolError,
    WatchdogConfig, WatchdogTimer,
};
use crate::sender::{ClientError, CollectorClient};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Cadence of the watchdog-supervised stats log line.
const STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Breathing room between an OS resume and the forced health check, so the
/// network stack has a chance to come back before we probe it.
const RESUME_HEALTH_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("queue setup failed: {0}")]
    Queue(#[from] QueueError),
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] ClientError),
    #[error("spool setup failed: {0}")]
    Spool(#[from] SpoolError),
}

/// Owns every pipeline component and the wiring between them:
/// health-regained triggers an immediate retry flush, and an OS resume
/// forces watchdog recovery plus a delayed health check.
///
/// Producers interact through `enqueue` only; everything downstream of the
/// queue is background work.
pub struct Pipeline {
    queue: Arc<BoundedQueue>,
    spool: Arc<EventSpool>,
    publisher: Arc<Publisher>,
    health: Arc<HealthMonitor>,
    resume: Arc<ResumeMonitor>,
    stats_watchdog: Arc<WatchdogTimer>,
    session: SessionContext,
    running: AtomicBool,
    wiring: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let queue = Arc::new(BoundedQueue::new(config.queue_capacity)?);
        let spool = Arc::new(EventSpool::new(config.spool_config())?);
        let client = CollectorClient::new(config.client_config()?)?;
        let circuit = Arc::new(CircuitBreaker::new(config.circuit_config()));

        let publisher = Publisher::new(
            Arc::clone(&queue),
            Arc::clone(&spool),
            client.clone(),
            config.retry_policy(),
            Arc::clone(&circuit),
            config.publisher_config(),
        );
        let health = Arc::new(HealthMonitor::new(client, config.health_config()));
        let resume = Arc::new(ResumeMonitor::new(config.resume_config()));

        let stats_queue = Arc::clone(&queue);
        let stats_circuit = Arc::clone(&circuit);
        let stats_watchdog = Arc::new(WatchdogTimer::new(
            "stats-refresh",
            WatchdogConfig::new(STATS_REFRESH_INTERVAL),
            move || {
                let stats = stats_queue.stats();
                tracing::info!(
                    queue_len = stats.len,
                    enqueued = stats.enqueued,
                    dequeued = stats.dequeued,
                    overflowed = stats.overflowed,
                    circuit_open = stats_circuit.is_open(),
                    "pipeline stats"
                );
            },
        ));

        Ok(Self {
            queue,
            spool,
            publisher,
            health,
            resume,
            stats_watchdog,
            session: SessionContext::detect(),
            running: AtomicBool::new(false),
            wiring: Mutex::new(Vec::new()),
        })
    }

    /// Starts every component and the cross-component signal wiring.
    /// Calling twice has no additional effect.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.publisher.start();
        self.health.start();
        self.resume.start();
        self.stats_watchdog.start();

        // Collector came back: flush queued work and replay the spool
        // without waiting for the next periodic cycle.
        let publisher = Arc::clone(&self.publisher);
        let mut health_rx = self.health.subscribe();
        let health_task = tokio::spawn(async move {
            loop {
                match health_rx.recv().await {
                    Ok(true) => {
                        tracing::info!("collector recovered, triggering retry flush");
                        publisher.trigger_retry();
                    }
                    Ok(false) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // OS resume: timers may have stalled during sleep, so force
        // recovery, then probe the collector and kick a flush after a
        // short grace period (spooled pre-suspend batches should not wait
        // for a health edge that may never come).
        let watchdog = Arc::clone(&self.stats_watchdog);
        let health = Arc::clone(&self.health);
        let resume_publisher = Arc::clone(&self.publisher);
        let mut resume_rx = self.resume.subscribe();
        let resume_task = tokio::spawn(async move {
            loop {
                match resume_rx.recv().await {
                    Ok(event) => {
                        tracing::info!(
                            suspended_secs = event.suspended_for.as_secs(),
                            "resume detected, recovering timers"
                        );
                        watchdog.trigger_recovery();
                        tokio::time::sleep(RESUME_HEALTH_GRACE).await;
                        health.check_now().await;
                        resume_publisher.trigger_retry();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut wiring = self.wiring.lock();
        wiring.push(health_task);
        wiring.push(resume_task);

        tracing::info!("pipeline started");
    }

    /// Stamps missing session fields and hands the event to the queue.
    /// Never blocks and never fails; overflow evicts the oldest event into
    /// the spool instead.
    pub fn enqueue(&self, mut event: AuditEvent) {
        self.session.apply(&mut event);
        self.queue.enqueue(event);
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats().await
    }

    pub fn health_state(&self) -> HealthState {
        self.health.state()
    }

    /// Schedules an immediate flush plus spool drain.
    pub fn flush_now(&self) {
        self.publisher.flush_now();
    }

    /// Permanently deletes all unsent spooled events.
    pub async fn discard_spool(&self) -> Result<(), SpoolError> {
        self.publisher.discard_spool().await
    }

    /// Stops every component, then persists whatever is still queued so a
    /// restart can replay it. Calling twice has no additional effect.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.resume.stop();
        self.stats_watchdog.stop();
        self.health.stop();

        let wiring: Vec<JoinHandle<()>> = std::mem::take(&mut *self.wiring.lock());
        for task in wiring {
            task.abort();
        }

        self.publisher.stop().await;

        let remaining = self.queue.dequeue_batch(self.queue.len());
        if !remaining.is_empty() {
            match self.spool.append_events(&remaining).await {
                Ok(()) => {
                    tracing::info!(count = remaining.len(), "spooled queued events at shutdown");
                }
                Err(e) => {
                    tracing::error!(
                        count = remaining.len(),
                        error = %e,
                        "failed to spool queued events at shutdown, events lost"
                    );
                }
            }
        }

        tracing::info!("pipeline stopped");
    }
}
