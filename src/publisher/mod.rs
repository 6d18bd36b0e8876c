//! The flush loop: drains batches from the queue, delivers them through the
//! retry + circuit-breaker wrappers, and spills failures to the spool.

use crate::buffer::BoundedQueue;
use crate::domain::AuditEvent;
use crate::reliability::{CircuitBreaker, EventSpool, RetryPolicy, SpoolError};
use crate::sender::{CollectorClient, SendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Cadence of the periodic flush.
    pub flush_interval: Duration,
    /// Upper bound on events per delivery attempt.
    pub batch_size: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            batch_size: 1000,
        }
    }
}

/// Immutable snapshot of publisher state for the status surface.
#[derive(Debug, Clone)]
pub struct PublisherStats {
    pub running: bool,
    pub events_sent: u64,
    pub events_failed: u64,
    pub events_spooled: u64,
    pub flushes: u64,
    pub queue_len: usize,
    pub spool_bytes: u64,
    pub spool_has_events: bool,
    pub circuit_open: bool,
}

/// Turns queued events into delivered HTTP batches.
///
/// A single flush loop runs on a background task; a flush-in-progress CAS
/// flag prevents overlapping runs when a trigger fires while a flush is
/// still under way (the flag is not a lock, so producers keep enqueuing).
/// Failed batches — including circuit-open short-circuits — are appended to
/// the spool, never dropped. Network errors become values at the sender
/// boundary; nothing propagates past the publisher as a panic.
pub struct Publisher {
    queue: Arc<BoundedQueue>,
    spool: Arc<EventSpool>,
    client: CollectorClient,
    retry: RetryPolicy,
    circuit: Arc<CircuitBreaker>,
    config: PublisherConfig,
    running: AtomicBool,
    flush_in_progress: AtomicBool,
    sent: AtomicU64,
    failed: AtomicU64,
    spooled: AtomicU64,
    flushes: AtomicU64,
    wakeup: Arc<Notify>,
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Publisher {
    pub fn new(
        queue: Arc<BoundedQueue>,
        spool: Arc<EventSpool>,
        client: CollectorClient,
        retry: RetryPolicy,
        circuit: Arc<CircuitBreaker>,
        config: PublisherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            spool,
            client,
            retry,
            circuit,
            config,
            running: AtomicBool::new(false),
            flush_in_progress: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            spooled: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            wakeup: Arc::new(Notify::new()),
            cancel: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the flush loop and the overflow worker. Before the periodic
    /// cadence begins, any events left in the spool from a previous run are
    /// drained. Calling twice has no additional effect.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        // Queue evictions funnel through an unbounded channel so the
        // producer thread never waits on disk.
        let (overflow_tx, overflow_rx) = mpsc::unbounded_channel::<AuditEvent>();
        self.queue.set_overflow_handler(move |event| {
            let _ = overflow_tx.send(event);
        });

        let worker = Arc::clone(self);
        let worker_token = token.clone();
        let overflow_task = tokio::spawn(async move {
            worker.run_overflow_worker(overflow_rx, worker_token).await;
        });

        let flusher = Arc::clone(self);
        let flush_task = tokio::spawn(async move {
            flusher.drain_spool().await;
            flusher.run_flush_loop(token).await;
        });

        let mut tasks = self.tasks.lock();
        tasks.push(overflow_task);
        tasks.push(flush_task);

        tracing::info!(
            flush_interval_secs = self.config.flush_interval.as_secs(),
            batch_size = self.config.batch_size,
            "publisher started"
        );
    }

    /// Stops the background tasks cooperatively. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!(
            sent = self.sent.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            spooled = self.spooled.load(Ordering::Relaxed),
            "publisher stopped"
        );
    }

    /// Schedules an immediate out-of-band flush plus a spool drain, e.g.
    /// when the health monitor reports the collector has recovered.
    pub fn trigger_retry(&self) {
        self.wakeup.notify_one();
    }

    /// Explicit "flush now" action for the status surface.
    pub fn flush_now(&self) {
        self.trigger_retry();
    }

    /// Bypass path for queue-overflow evictions: the event goes straight to
    /// the spool instead of through the batch-delivery path.
    pub async fn buffer_event_directly(&self, event: AuditEvent) {
        match self.spool.append_events(std::slice::from_ref(&event)).await {
            Ok(()) => {
                self.spooled.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                // The one genuine data-loss scenario: the queue already
                // evicted the event and durable persistence failed too.
                tracing::error!(
                    event_id = %event.event_id,
                    error = %e,
                    "failed to spool evicted event, event lost"
                );
            }
        }
    }

    /// Permanently deletes all unsent spooled data. Destructive; the caller
    /// owns confirmation.
    pub async fn discard_spool(&self) -> Result<(), SpoolError> {
        let rotated = self.spool.rotated_files().await?;
        for file in &rotated {
            self.spool.delete_file(file).await?;
        }
        self.spool.clear().await?;
        tracing::warn!(
            rotated_files = rotated.len(),
            "spool discarded, unsent events permanently deleted"
        );
        Ok(())
    }

    pub async fn stats(&self) -> PublisherStats {
        PublisherStats {
            running: self.running.load(Ordering::SeqCst),
            events_sent: self.sent.load(Ordering::Relaxed),
            events_failed: self.failed.load(Ordering::Relaxed),
            events_spooled: self.spooled.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            queue_len: self.queue.len(),
            spool_bytes: self.spool.size().await,
            spool_has_events: self.spool.has_events().await,
            circuit_open: self.circuit.is_open(),
        }
    }

    async fn run_flush_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            let triggered = tokio::select! {
                _ = tokio::time::sleep(self.config.flush_interval) => false,
                _ = self.wakeup.notified() => true,
                _ = token.cancelled() => break,
            };

            self.flush_once(&token).await;
            if triggered {
                self.drain_spool().await;
            }
        }
        tracing::debug!("flush loop exited");
    }

    async fn run_overflow_worker(
        &self,
        mut rx: mpsc::UnboundedReceiver<AuditEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.buffer_event_directly(event).await,
                    None => break,
                },
            }
        }
        // Flush any evictions that raced with shutdown.
        while let Ok(event) = rx.try_recv() {
            self.buffer_event_directly(event).await;
        }
        tracing::debug!("overflow worker exited");
    }

    /// One flush cycle. The CAS flag makes overlapping invocations no-ops
    /// rather than queued work.
    async fn flush_once(&self, token: &CancellationToken) {
        if self
            .flush_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("flush already in progress, skipping");
            return;
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);

        let batch = self.queue.dequeue_batch(self.config.batch_size);
        if !batch.is_empty() {
            let count = batch.len() as u64;
            match self.deliver(&batch, token).await {
                Ok(()) => {
                    self.sent.fetch_add(count, Ordering::Relaxed);
                    tracing::debug!(count, "batch delivered");
                }
                Err(e) => {
                    self.failed.fetch_add(count, Ordering::Relaxed);
                    tracing::warn!(count, error = %e, "batch delivery failed, spooling");
                    match self.spool.append_events(&batch).await {
                        Ok(()) => {
                            self.spooled.fetch_add(count, Ordering::Relaxed);
                        }
                        Err(spool_err) => {
                            tracing::error!(
                                count,
                                error = %spool_err,
                                "failed to spool undelivered batch, events lost"
                            );
                        }
                    }
                }
            }
        }

        self.flush_in_progress.store(false, Ordering::SeqCst);
    }

    /// Delivery wrapped by the circuit breaker and the retry policy. The
    /// breaker is consulted before every attempt so an open circuit never
    /// touches the network.
    async fn deliver(&self, batch: &[AuditEvent], token: &CancellationToken) -> Result<(), SendError> {
        let mut attempt = 1;
        loop {
            if !self.circuit.allow_call() {
                return Err(SendError::CircuitOpen);
            }

            let error = match self.client.send_batch(batch).await {
                Ok(()) => {
                    self.circuit.record_success();
                    return Ok(());
                }
                Err(e) => {
                    self.circuit.record_failure();
                    e
                }
            };

            if !error.is_transient() || attempt >= self.retry.max_attempts {
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient delivery failure, backing off"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                // Cancellation surfaces as a delivery failure so the batch
                // still lands in the spool.
                _ = token.cancelled() => return Err(error),
            }
            attempt += 1;
        }
    }

    /// Attempts to replay spooled events. The active file is first renamed
    /// aside as a rotated snapshot, so events appended while the drain is in
    /// flight land in a fresh active file and can never be deleted
    /// undelivered. Each rotated file is then processed independently,
    /// oldest first, and deleted only after its full contents are confirmed
    /// delivered; on failure it is left intact for the next attempt.
    /// Replays can duplicate events already delivered in a partial earlier
    /// pass — the collector deduplicates on the event id.
    pub async fn drain_spool(&self) {
        let token = self.cancel.lock().clone();

        if let Err(e) = self.spool.rotate_for_read().await {
            tracing::error!(error = %e, "failed to snapshot active spool file");
            return;
        }

        let mut rotated = match self.spool.rotated_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "failed to enumerate rotated spool files");
                return;
            }
        };
        // Timestamped names sort chronologically.
        rotated.sort();
        for file in rotated {
            if token.is_cancelled() {
                return;
            }
            let events = match self.spool.read_events_from_file(&file).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(file = %file.display(), error = %e, "failed to read rotated spool file");
                    continue;
                }
            };
            if events.is_empty() || self.deliver_all(&events, &token).await {
                let count = events.len() as u64;
                if let Err(e) = self.spool.delete_file(&file).await {
                    tracing::error!(file = %file.display(), error = %e, "failed to delete drained spool file");
                } else {
                    self.sent.fetch_add(count, Ordering::Relaxed);
                    tracing::info!(file = %file.display(), count, "drained rotated spool file");
                }
            }
        }
    }

    /// Delivers spooled events in batch-sized chunks; true only if every
    /// chunk was confirmed.
    async fn deliver_all(&self, events: &[AuditEvent], token: &CancellationToken) -> bool {
        for chunk in events.chunks(self.config.batch_size) {
            if self.deliver(chunk, token).await.is_err() {
                return false;
            }
        }
        true
    }
}
