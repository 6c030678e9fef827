//! Central quotation pipeline
//!
//! All raw ticks funnel through one unbounded ingress queue drained by a
//! single worker task, which guarantees per-instrument processing order is
//! exactly enqueue order. The worker enforces strictly increasing
//! per-instrument timestamps, normalizes prices, forwards only changed
//! quotations, and batches everything for persistence.
//!
//! The persistence buffer is guarded by a read/write lock used purely to
//! make the drain-and-clear atomic; gateway I/O always happens after the
//! lock is released. Failed batches are re-buffered ahead of newer
//! quotations and retried on the next flush trigger.

use crate::forward::ForwardHandle;
use crate::metrics::ServiceMetrics;
use crate::normalize;
use crate::persist::PersistenceGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use types::errors::{MediatorError, PersistenceError, TransportError};
use types::instrument::Instrument;
use types::quotation::{parse_timestamp_text, Quotation, RawTick, Side};

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Buffer size that triggers an asynchronous flush.
    pub batch_size: usize,
    /// Interval of the scheduled flush, bounding durable staleness.
    pub flush_interval: Duration,
    /// Backlog alert threshold as a multiple of `batch_size`.
    pub backlog_alert_factor: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Duration::from_secs(600),
            backlog_alert_factor: 10,
        }
    }
}

/// Commands entering the worker through the ingress queue.
enum Ingress {
    /// Fire-and-forget tick from a producer.
    Tick(RawTick),
    /// First sample of a connection; the sender awaits the outcome.
    First {
        tick: RawTick,
        done: oneshot::Sender<Result<(), MediatorError>>,
    },
    /// Clear an instrument's last-known slot after a disconnect.
    Reset(Instrument),
}

/// Cloneable pipeline handle: ingress entry points plus the persistence
/// buffer shared with flush triggers.
#[derive(Clone)]
pub struct QuotationPipeline {
    ingress_tx: mpsc::UnboundedSender<Ingress>,
    buffer: Arc<RwLock<Vec<Quotation>>>,
    gateway: Arc<dyn PersistenceGateway>,
    metrics: Arc<ServiceMetrics>,
    config: PipelineConfig,
}

impl QuotationPipeline {
    /// Build the pipeline handle and its worker.
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        forward: ForwardHandle,
        metrics: Arc<ServiceMetrics>,
        config: PipelineConfig,
    ) -> (QuotationPipeline, PipelineWorker) {
        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        let handle = QuotationPipeline {
            ingress_tx,
            buffer: Arc::new(RwLock::new(Vec::new())),
            gateway,
            metrics,
            config,
        };
        let worker = PipelineWorker {
            ingress_rx,
            last_known: [None; Instrument::COUNT],
            handle: handle.clone(),
            forward,
        };
        (handle, worker)
    }

    /// Enqueue a raw tick without blocking the caller.
    pub fn enqueue(&self, tick: RawTick) {
        if self.ingress_tx.send(Ingress::Tick(tick)).is_err() {
            warn!("ingress queue closed; tick dropped");
            self.metrics.record_tick_dropped();
        }
    }

    /// Ingest the first sample of a fresh connection synchronously: the
    /// quotation lands in the pipeline before this returns.
    pub async fn ingest_first(&self, tick: RawTick) -> Result<(), MediatorError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.ingress_tx
            .send(Ingress::First {
                tick,
                done: done_tx,
            })
            .map_err(|_| TransportError::ChannelUnavailable)?;
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ChannelUnavailable.into()),
        }
    }

    /// Clear the instrument's last-known quotation so the next `Init` is
    /// treated as a fresh first sample.
    pub fn reset(&self, instrument: Instrument) {
        let _ = self.ingress_tx.send(Ingress::Reset(instrument));
    }

    /// Drain the persistence buffer and store its contents.
    ///
    /// The drain-and-clear is atomic under the write lock; the gateway
    /// call runs after release. On failure the batch is re-inserted ahead
    /// of anything appended meanwhile, so per-instrument order survives
    /// the retry on the next trigger.
    pub async fn flush(&self) -> Result<usize, PersistenceError> {
        let batch: Vec<Quotation> = {
            let mut buffer = self.buffer.write().await;
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();

        match self.gateway.save(&batch).await {
            Ok(()) => {
                self.metrics.record_flush(count);
                debug!(count, "persistence flush complete");
                Ok(count)
            }
            Err(persistence_error) => {
                let backlog = {
                    let mut buffer = self.buffer.write().await;
                    let mut restored = batch;
                    restored.append(&mut buffer);
                    *buffer = restored;
                    buffer.len()
                };
                self.metrics.record_flush_failure();
                error!(
                    error = %persistence_error,
                    backlog,
                    "persistence save failed; batch re-buffered for retry"
                );
                if backlog >= self.config.batch_size * self.config.backlog_alert_factor {
                    self.metrics.raise_backlog_alert(backlog);
                    error!(backlog, "persistence backlog exceeds alert threshold");
                }
                Err(persistence_error)
            }
        }
    }

    /// Scheduled-flush task, bounding the staleness of durable storage.
    pub async fn run_flush_timer(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        interval.tick().await;
        info!(interval = ?self.config.flush_interval, "flush timer started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.flush().await {
                        warn!(error = %error, "scheduled flush failed");
                    }
                }
            }
        }
        info!("flush timer stopped");
    }

    /// Number of quotations currently awaiting persistence.
    pub async fn buffered_len(&self) -> usize {
        self.buffer.read().await.len()
    }

    /// Append one quotation; buffer reaching the batch threshold triggers
    /// an asynchronous flush.
    async fn append(&self, quotation: Quotation) {
        let buffered = {
            let mut buffer = self.buffer.write().await;
            buffer.push(quotation);
            buffer.len()
        };
        if buffered >= self.config.batch_size {
            let pipeline = self.clone();
            tokio::spawn(async move {
                if let Err(error) = pipeline.flush().await {
                    warn!(error = %error, "size-triggered flush failed");
                }
            });
        }
    }
}

/// Bump a candidate timestamp until it is strictly greater than the last
/// stored one, in 1 ms increments.
fn monotonic_timestamp(last_ms: Option<i64>, candidate_ms: i64) -> i64 {
    let mut timestamp_ms = candidate_ms;
    if let Some(last_ms) = last_ms {
        while timestamp_ms <= last_ms {
            timestamp_ms += 1;
        }
    }
    timestamp_ms
}

/// The single consumer of the ingress queue. Owns the per-instrument
/// last-known slots; nothing else touches them.
pub struct PipelineWorker {
    ingress_rx: mpsc::UnboundedReceiver<Ingress>,
    last_known: [Option<Quotation>; Instrument::COUNT],
    handle: QuotationPipeline,
    forward: ForwardHandle,
}

impl PipelineWorker {
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("pipeline worker started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                command = self.ingress_rx.recv() => match command {
                    Some(Ingress::Tick(tick)) => {
                        if let Err(error) = self.process(tick).await {
                            warn!(error = %error, "tick dropped");
                            self.handle.metrics.record_tick_dropped();
                        }
                    }
                    Some(Ingress::First { tick, done }) => {
                        let result = self.process(tick).await;
                        if let Err(error) = &result {
                            warn!(error = %error, "first sample rejected");
                            self.handle.metrics.record_tick_dropped();
                        }
                        let _ = done.send(result);
                    }
                    Some(Ingress::Reset(instrument)) => {
                        self.last_known[instrument.index()] = None;
                        debug!(instrument = %instrument, "last-known quotation cleared");
                    }
                    None => break,
                }
            }
        }
        // Buffered quotations must not be lost on cancellation.
        if let Err(error) = self.handle.flush().await {
            error!(error = %error, "final flush failed");
        }
        info!("pipeline worker stopped");
    }

    async fn process(&mut self, raw: RawTick) -> Result<(), MediatorError> {
        let instrument = raw.instrument;
        let slot = instrument.index();

        let parsed_ms = parse_timestamp_text(&raw.timestamp_text)?;
        let timestamp_ms =
            monotonic_timestamp(self.last_known[slot].map(|q| q.timestamp_ms), parsed_ms);

        let ask_ticks = normalize::normalize(instrument, Side::Ask, raw.ask)?;
        let bid_ticks = normalize::normalize(instrument, Side::Bid, raw.bid)?;

        let quotation = Quotation {
            instrument,
            timestamp_ms,
            ask_ticks,
            bid_ticks,
        };

        // Only deltas are live-streamed; repeats still get persisted.
        let changed = match &self.last_known[slot] {
            Some(last) => last.ask_ticks != ask_ticks || last.bid_ticks != bid_ticks,
            None => true,
        };
        if changed {
            self.forward.send(quotation);
            self.handle.metrics.record_forwarded();
        } else {
            debug!(instrument = %instrument, "unchanged quotation not forwarded");
        }

        self.handle.append(quotation).await;
        self.last_known[slot] = Some(quotation);
        self.handle.metrics.record_tick_processed();
        Ok(())
    }
}
