//! Real-time forwarding to the downstream consumer
//!
//! Mirrors accepted quotations onto a duplex stream: a single sender task
//! drains the outbound queue while a separate reader task consumes
//! acknowledgement replies. The stream opens only once all instruments are
//! simultaneously connected and is torn down when any of them drops.
//!
//! This is the live-telemetry path, not an at-least-once channel: with no
//! open stream, quotations are dropped best-effort and counted. Durability
//! belongs to the persistence path.

use crate::metrics::ServiceMetrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::errors::TransportError;
use types::instrument::Instrument;
use types::quotation::Quotation;
use uuid::Uuid;

/// Expected acknowledgement reply text.
pub const ACK_OK: &str = "ok";

/// A quotation as written to the downstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedQuotation {
    /// Time-sortable message identifier (UUID v7).
    pub id: Uuid,
    pub instrument: Instrument,
    pub timestamp_ms: i64,
    pub ask_ticks: i64,
    pub bid_ticks: i64,
}

impl ForwardedQuotation {
    pub fn from_quotation(quotation: &Quotation) -> Self {
        Self {
            id: Uuid::now_v7(),
            instrument: quotation.instrument,
            timestamp_ms: quotation.timestamp_ms,
            ask_ticks: quotation.ask_ticks,
            bid_ticks: quotation.bid_ticks,
        }
    }
}

/// An acknowledgement read back from the downstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckReply {
    pub reply: String,
}

impl AckReply {
    pub fn is_ok(&self) -> bool {
        self.reply == ACK_OK
    }
}

/// Factory for the duplex consumer stream. The transport owns reconnect
/// policy; the sink only opens and drops stream halves.
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    async fn open(
        &self,
    ) -> Result<(Box<dyn ConsumerSink>, Box<dyn AckSource>), TransportError>;
}

/// Write half of the duplex stream.
#[async_trait]
pub trait ConsumerSink: Send {
    async fn send(&mut self, quotation: &ForwardedQuotation) -> Result<(), TransportError>;
}

/// Read half of the duplex stream. `Ok(None)` means the stream ended.
#[async_trait]
pub trait AckSource: Send {
    async fn next_ack(&mut self) -> Result<Option<AckReply>, TransportError>;
}

/// Lifecycle commands from the connection coordinator's aggregate edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Open,
    Close,
}

/// Cloneable handle feeding the sink task.
#[derive(Clone)]
pub struct ForwardHandle {
    quote_tx: mpsc::UnboundedSender<Quotation>,
    control_tx: mpsc::UnboundedSender<SinkControl>,
}

impl ForwardHandle {
    /// Build a handle around raw channel ends. `ForwardingSink::new` wraps
    /// this; in-process embeddings can also drain the receivers directly.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<Quotation>,
        mpsc::UnboundedReceiver<SinkControl>,
    ) {
        let (quote_tx, quote_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        (
            ForwardHandle {
                quote_tx,
                control_tx,
            },
            quote_rx,
            control_rx,
        )
    }

    /// Queue a quotation for forwarding. Never blocks the caller.
    pub fn send(&self, quotation: Quotation) {
        let _ = self.quote_tx.send(quotation);
    }

    /// Open the downstream stream (all instruments connected).
    pub fn open(&self) {
        let _ = self.control_tx.send(SinkControl::Open);
    }

    /// Tear down the downstream stream (an instrument disconnected).
    pub fn close(&self) {
        let _ = self.control_tx.send(SinkControl::Close);
    }
}

/// The sink task: owns the stream halves and drains the outbound queue.
pub struct ForwardingSink {
    transport: Arc<dyn ConsumerTransport>,
    quote_rx: mpsc::UnboundedReceiver<Quotation>,
    control_rx: mpsc::UnboundedReceiver<SinkControl>,
    metrics: Arc<ServiceMetrics>,
}

impl ForwardingSink {
    pub fn new(
        transport: Arc<dyn ConsumerTransport>,
        metrics: Arc<ServiceMetrics>,
    ) -> (ForwardHandle, ForwardingSink) {
        let (handle, quote_rx, control_rx) = ForwardHandle::channel();
        (
            handle,
            ForwardingSink {
                transport,
                quote_rx,
                control_rx,
                metrics,
            },
        )
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("forwarding sink started");
        let mut sink: Option<Box<dyn ConsumerSink>> = None;
        let mut reader: Option<JoinHandle<()>> = None;

        loop {
            // Lifecycle commands precede quotations queued after them, so
            // the biased order keeps Open/Close effects deterministic.
            tokio::select! {
                biased;

                _ = shutdown.recv() => break,

                Some(control) = self.control_rx.recv() => match control {
                    SinkControl::Open => match self.transport.open().await {
                        Ok((stream_sink, acks)) => {
                            sink = Some(stream_sink);
                            reader = Some(tokio::spawn(read_acks(acks, self.metrics.clone())));
                            info!("downstream stream opened");
                        }
                        Err(error) => {
                            warn!(error = %error, "failed to open downstream stream");
                        }
                    },
                    SinkControl::Close => {
                        sink = None;
                        if let Some(handle) = reader.take() {
                            handle.abort();
                        }
                        info!("downstream stream closed");
                    }
                },

                Some(quotation) = self.quote_rx.recv() => {
                    match sink.as_mut() {
                        Some(stream_sink) => {
                            let message = ForwardedQuotation::from_quotation(&quotation);
                            if let Err(error) = stream_sink.send(&message).await {
                                warn!(
                                    instrument = %quotation.instrument,
                                    error = %error,
                                    "downstream send failed; dropping quotation"
                                );
                                self.metrics.record_forward_dropped();
                                sink = None;
                                if let Some(handle) = reader.take() {
                                    handle.abort();
                                }
                            } else {
                                self.metrics.record_forward_sent();
                            }
                        }
                        None => {
                            debug!(
                                instrument = %quotation.instrument,
                                "no downstream stream; quotation dropped"
                            );
                            self.metrics.record_forward_dropped();
                        }
                    }
                }
            }
        }

        if let Some(handle) = reader.take() {
            handle.abort();
        }
        info!("forwarding sink stopped");
    }
}

/// Reader task: consumes acknowledgement replies and validates them.
async fn read_acks(mut acks: Box<dyn AckSource>, metrics: Arc<ServiceMetrics>) {
    loop {
        match acks.next_ack().await {
            Ok(Some(reply)) if reply.is_ok() => {
                metrics.record_ack();
            }
            Ok(Some(reply)) => {
                warn!(reply = %reply.reply, "unexpected acknowledgement from consumer");
                metrics.record_protocol_violation();
            }
            Ok(None) => {
                debug!("acknowledgement stream ended");
                break;
            }
            Err(error) => {
                warn!(error = %error, "acknowledgement read failed");
                break;
            }
        }
    }
}
