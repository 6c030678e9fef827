//! Service wiring and lifecycle
//!
//! Spawns the full task set — one listener per instrument, the pipeline
//! worker, the scheduled-flush timer, and the forwarding sink — joined
//! only through queues and the coordinator lock. A single broadcast
//! shutdown signal reaches every loop; the pipeline worker flushes the
//! persistence buffer before exiting.
//!
//! Fatal faults (environment mismatch) arrive on the fault channel and
//! halt ingestion by triggering the same shutdown signal.

use crate::coordinator::ConnectionCoordinator;
use crate::forward::{ConsumerTransport, ForwardingSink};
use crate::listener::{IngestionListener, ProducerChannel};
use crate::metrics::ServiceMetrics;
use crate::persist::PersistenceGateway;
use crate::pipeline::{PipelineConfig, QuotationPipeline};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};
use types::errors::MediatorError;

/// Top-level service configuration.
#[derive(Debug, Clone, Default)]
pub struct MediatorConfig {
    pub pipeline: PipelineConfig,
}

/// A running mediation service and its task handles.
pub struct MediatorService {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    coordinator: Arc<ConnectionCoordinator>,
    pipeline: QuotationPipeline,
    metrics: Arc<ServiceMetrics>,
}

impl MediatorService {
    /// Spawn the whole task set. `channels` carries one instrument-scoped
    /// producer channel per mediated instrument.
    pub fn start(
        channels: Vec<Box<dyn ProducerChannel>>,
        consumer: Arc<dyn ConsumerTransport>,
        gateway: Arc<dyn PersistenceGateway>,
        config: MediatorConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let metrics = Arc::new(ServiceMetrics::new());
        let coordinator = Arc::new(ConnectionCoordinator::new());

        let (forward, sink) = ForwardingSink::new(consumer, metrics.clone());
        let (pipeline, worker) =
            QuotationPipeline::new(gateway, forward.clone(), metrics.clone(), config.pipeline);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        let mut tasks = vec![
            tokio::spawn(sink.run(shutdown_tx.subscribe())),
            tokio::spawn(worker.run(shutdown_tx.subscribe())),
            tokio::spawn(pipeline.clone().run_flush_timer(shutdown_tx.subscribe())),
            tokio::spawn(supervise(fault_rx, shutdown_tx.clone())),
        ];

        for channel in channels {
            let listener = IngestionListener::new(
                channel,
                pipeline.clone(),
                coordinator.clone(),
                forward.clone(),
                fault_tx.clone(),
            );
            tasks.push(tokio::spawn(listener.run(shutdown_tx.subscribe())));
        }
        // The listeners hold the only fault senders; the channel closes
        // with them and the supervisor exits.
        drop(fault_tx);

        info!(tasks = tasks.len(), "mediation service started");
        Self {
            shutdown_tx,
            tasks,
            coordinator,
            pipeline,
            metrics,
        }
    }

    /// Connection-state coordinator of this service instance.
    pub fn coordinator(&self) -> &Arc<ConnectionCoordinator> {
        &self.coordinator
    }

    /// Pipeline handle, e.g. for an explicit flush.
    pub fn pipeline(&self) -> &QuotationPipeline {
        &self.pipeline
    }

    /// Service metrics.
    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Signal shutdown and wait for every task to exit. The pipeline
    /// worker attempts a final persistence flush on its way out.
    pub async fn shutdown(self) {
        info!("mediation service shutting down");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        info!("mediation service stopped");
    }
}

/// Supervisory loop: a reported fault halts ingestion process-wide.
async fn supervise(
    mut faults: mpsc::UnboundedReceiver<MediatorError>,
    shutdown_tx: broadcast::Sender<()>,
) {
    while let Some(fault) = faults.recv().await {
        error!(error = %fault, "fatal fault reported; halting ingestion");
        let _ = shutdown_tx.send(());
        break;
    }
}
