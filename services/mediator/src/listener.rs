//! Per-instrument ingestion listeners
//!
//! Each listener serves exactly one instrument-scoped channel and at most
//! one producer connection at a time: accept, dispatch `Init`/`Tick`/
//! `DeInit` until the remote side closes, then loop back to accepting.
//! A fresh handler is constructed for every accepted connection, bound
//! only to the shared pipeline and coordinator handles — no handler state
//! survives a reconnect.
//!
//! Transport-level failures are logged and the accept loop re-enters;
//! they never crash the process. Malformed wire values fail the single
//! offending call with an error reply.

use crate::coordinator::{ConnectionCoordinator, ConnectionEvent};
use crate::forward::ForwardHandle;
use crate::pipeline::QuotationPipeline;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use types::connection::{DeInitReason, Environment};
use types::errors::{MediatorError, ProtocolError, TransportError};
use types::instrument::Instrument;
use types::quotation::RawTick;

/// Reply text signalling acceptance; any other string is an error message.
pub const OK_REPLY: &str = "ok";

/// An inbound producer operation with raw wire values. Ordinal decoding
/// happens in the handler so unknown values fail only their own call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerCall {
    Init {
        instrument: u32,
        timestamp: String,
        ask: f64,
        bid: f64,
        environment: u32,
    },
    Tick {
        instrument: u32,
        timestamp: String,
        ask: f64,
        bid: f64,
    },
    DeInit {
        instrument: u32,
        reason: u32,
    },
}

/// An instrument-scoped channel the transport binding listens on
/// (addressed as `IndicatorToMediator_<instrument>`).
#[async_trait]
pub trait ProducerChannel: Send + Sync {
    /// The instrument this channel serves.
    fn instrument(&self) -> Instrument;

    /// Wait for the next producer connection.
    async fn accept(&self) -> Result<Box<dyn ProducerConnection>, TransportError>;
}

/// One accepted producer connection.
#[async_trait]
pub trait ProducerConnection: Send {
    /// Next inbound call; `Ok(None)` when the remote side closed.
    async fn next_call(&mut self) -> Result<Option<ProducerCall>, TransportError>;

    /// Send a reply for the current call.
    async fn reply(&mut self, text: &str) -> Result<(), TransportError>;
}

enum ServeOutcome {
    RemoteClosed,
    TransportFailed,
    Shutdown,
}

/// Long-lived accept loop for one instrument.
pub struct IngestionListener {
    instrument: Instrument,
    channel: Box<dyn ProducerChannel>,
    pipeline: QuotationPipeline,
    coordinator: Arc<ConnectionCoordinator>,
    forward: ForwardHandle,
    faults: mpsc::UnboundedSender<MediatorError>,
}

impl IngestionListener {
    pub fn new(
        channel: Box<dyn ProducerChannel>,
        pipeline: QuotationPipeline,
        coordinator: Arc<ConnectionCoordinator>,
        forward: ForwardHandle,
        faults: mpsc::UnboundedSender<MediatorError>,
    ) -> Self {
        Self {
            instrument: channel.instrument(),
            channel,
            pipeline,
            coordinator,
            forward,
            faults,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            instrument = %self.instrument,
            address = %self.instrument.channel_name(),
            "ingestion listener started"
        );
        loop {
            let mut connection = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.channel.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(transport_error) => {
                        warn!(
                            instrument = %self.instrument,
                            error = %transport_error,
                            "accept failed; re-entering accept loop"
                        );
                        continue;
                    }
                }
            };
            info!(instrument = %self.instrument, "producer connection accepted");

            // Fresh handler per connection
            let mut handler = self.handler();
            match handler.serve(connection.as_mut(), &mut shutdown).await {
                ServeOutcome::Shutdown => break,
                ServeOutcome::RemoteClosed | ServeOutcome::TransportFailed => continue,
            }
        }
        info!(instrument = %self.instrument, "ingestion listener stopped");
    }

    fn handler(&self) -> ConnectionHandler {
        ConnectionHandler {
            instrument: self.instrument,
            pipeline: self.pipeline.clone(),
            coordinator: self.coordinator.clone(),
            forward: self.forward.clone(),
            faults: self.faults.clone(),
        }
    }
}

/// Per-connection dispatcher; discarded when its connection closes.
struct ConnectionHandler {
    instrument: Instrument,
    pipeline: QuotationPipeline,
    coordinator: Arc<ConnectionCoordinator>,
    forward: ForwardHandle,
    faults: mpsc::UnboundedSender<MediatorError>,
}

impl ConnectionHandler {
    async fn serve(
        &mut self,
        connection: &mut dyn ProducerConnection,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ServeOutcome {
        loop {
            let call = tokio::select! {
                _ = shutdown.recv() => return ServeOutcome::Shutdown,
                call = connection.next_call() => call,
            };
            match call {
                Ok(Some(call)) => self.dispatch(connection, call).await,
                Ok(None) => {
                    info!(instrument = %self.instrument, "producer disconnected");
                    return ServeOutcome::RemoteClosed;
                }
                Err(transport_error) => {
                    warn!(
                        instrument = %self.instrument,
                        error = %transport_error,
                        "transport read failed; dropping connection"
                    );
                    return ServeOutcome::TransportFailed;
                }
            }
        }
    }

    async fn dispatch(&mut self, connection: &mut dyn ProducerConnection, call: ProducerCall) {
        match call {
            ProducerCall::Tick {
                instrument,
                timestamp,
                ask,
                bid,
            } => {
                let reply = self.handle_tick(instrument, timestamp, ask, bid);
                self.send_reply(connection, &reply).await;
            }
            ProducerCall::Init {
                instrument,
                timestamp,
                ask,
                bid,
                environment,
            } => {
                let reply = self
                    .handle_init(instrument, timestamp, ask, bid, environment)
                    .await;
                self.send_reply(connection, &reply).await;
            }
            // Fire-and-forget: no reply
            ProducerCall::DeInit { instrument, reason } => {
                self.handle_deinit(instrument, reason);
            }
        }
    }

    fn handle_tick(&self, instrument: u32, timestamp: String, ask: f64, bid: f64) -> String {
        match self.decode_instrument(instrument) {
            Ok(instrument) => {
                self.pipeline.enqueue(RawTick {
                    instrument,
                    timestamp_text: timestamp,
                    ask,
                    bid,
                });
                OK_REPLY.to_string()
            }
            Err(protocol_error) => MediatorError::from(protocol_error).to_string(),
        }
    }

    async fn handle_init(
        &mut self,
        instrument: u32,
        timestamp: String,
        ask: f64,
        bid: f64,
        environment: u32,
    ) -> String {
        match self
            .init_inner(instrument, timestamp, ask, bid, environment)
            .await
        {
            Ok(()) => OK_REPLY.to_string(),
            Err(mediator_error) => {
                if matches!(mediator_error, MediatorError::Consistency(_)) {
                    error!(
                        instrument = %self.instrument,
                        error = %mediator_error,
                        "fatal consistency violation; escalating"
                    );
                    let _ = self.faults.send(mediator_error.clone());
                }
                mediator_error.to_string()
            }
        }
    }

    async fn init_inner(
        &mut self,
        instrument: u32,
        timestamp: String,
        ask: f64,
        bid: f64,
        environment: u32,
    ) -> Result<(), MediatorError> {
        let instrument = self.decode_instrument(instrument)?;
        let environment = Environment::from_wire(environment).ok_or(
            ProtocolError::UnknownEnvironment {
                ordinal: environment,
            },
        )?;

        let event = self.coordinator.on_init(instrument, environment)?;

        // The first sample must land before the acknowledgement.
        self.pipeline
            .ingest_first(RawTick {
                instrument,
                timestamp_text: timestamp,
                ask,
                bid,
            })
            .await?;

        if let ConnectionEvent::AllConnected { environment } = event {
            info!(
                environment = %environment,
                "all producers connected; opening downstream stream"
            );
            self.forward.open();
        }
        Ok(())
    }

    fn handle_deinit(&mut self, instrument: u32, reason: u32) {
        let decoded = self.decode_instrument(instrument).and_then(|instrument| {
            DeInitReason::from_wire(reason)
                .ok_or(ProtocolError::UnknownDeInitReason { ordinal: reason })
                .map(|reason| (instrument, reason))
        });
        let (instrument, reason) = match decoded {
            Ok(pair) => pair,
            Err(protocol_error) => {
                warn!(
                    instrument = %self.instrument,
                    error = %protocol_error,
                    "deinit rejected"
                );
                return;
            }
        };

        match self.coordinator.on_deinit(instrument, reason) {
            Ok(event) => {
                self.pipeline.reset(instrument);
                if let ConnectionEvent::Disconnected { .. } = event {
                    info!(
                        instrument = %instrument,
                        "downstream no longer fully connected; closing stream"
                    );
                    self.forward.close();
                }
            }
            Err(mediator_error) => {
                warn!(instrument = %instrument, error = %mediator_error, "deinit rejected");
            }
        }
    }

    fn decode_instrument(&self, ordinal: u32) -> Result<Instrument, ProtocolError> {
        let instrument =
            Instrument::from_wire(ordinal).ok_or(ProtocolError::UnknownInstrument { ordinal })?;
        if instrument != self.instrument {
            return Err(ProtocolError::WrongChannel {
                expected: self.instrument,
                received: instrument,
            });
        }
        Ok(instrument)
    }

    async fn send_reply(&self, connection: &mut dyn ProducerConnection, text: &str) {
        if let Err(transport_error) = connection.reply(text).await {
            warn!(
                instrument = %self.instrument,
                error = %transport_error,
                "reply failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ServiceMetrics;
    use crate::persist::PersistenceGateway;
    use crate::pipeline::PipelineConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use types::errors::PersistenceError;
    use types::quotation::Quotation;

    struct NullGateway;

    #[async_trait]
    impl PersistenceGateway for NullGateway {
        async fn save(&self, _quotations: &[Quotation]) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    struct ScriptedChannel {
        instrument: Instrument,
        connection: Mutex<Option<Box<dyn ProducerConnection>>>,
    }

    #[async_trait]
    impl ProducerChannel for ScriptedChannel {
        fn instrument(&self) -> Instrument {
            self.instrument
        }

        async fn accept(&self) -> Result<Box<dyn ProducerConnection>, TransportError> {
            if let Some(connection) = self.connection.lock().unwrap().take() {
                return Ok(connection);
            }
            // Only one scripted connection; wait out the test afterwards
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct ScriptedConnection {
        calls: VecDeque<ProducerCall>,
        replies: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProducerConnection for ScriptedConnection {
        async fn next_call(&mut self) -> Result<Option<ProducerCall>, TransportError> {
            Ok(self.calls.pop_front())
        }

        async fn reply(&mut self, text: &str) -> Result<(), TransportError> {
            self.replies.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Fixture {
        pipeline: QuotationPipeline,
        coordinator: Arc<ConnectionCoordinator>,
        replies: Arc<Mutex<Vec<String>>>,
        shutdown_tx: broadcast::Sender<()>,
        tasks: Vec<tokio::task::JoinHandle<()>>,
        // Held so sink control sends keep a live receiver
        _control_rx: mpsc::UnboundedReceiver<crate::forward::SinkControl>,
    }

    fn start(instrument: Instrument, calls: Vec<ProducerCall>) -> Fixture {
        let metrics = Arc::new(ServiceMetrics::new());
        let (forward, _quote_rx, control_rx) = ForwardHandle::channel();
        let (pipeline, worker) = QuotationPipeline::new(
            Arc::new(NullGateway),
            forward.clone(),
            metrics,
            PipelineConfig::default(),
        );
        let coordinator = Arc::new(ConnectionCoordinator::new());
        let (fault_tx, _fault_rx) = mpsc::unbounded_channel();
        let replies = Arc::new(Mutex::new(Vec::new()));

        let channel = ScriptedChannel {
            instrument,
            connection: Mutex::new(Some(Box::new(ScriptedConnection {
                calls: calls.into(),
                replies: replies.clone(),
            }))),
        };
        let listener = IngestionListener::new(
            Box::new(channel),
            pipeline.clone(),
            coordinator.clone(),
            forward,
            fault_tx,
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let tasks = vec![
            tokio::spawn(worker.run(shutdown_tx.subscribe())),
            tokio::spawn(listener.run(shutdown_tx.subscribe())),
        ];
        Fixture {
            pipeline,
            coordinator,
            replies,
            shutdown_tx,
            tasks,
            _control_rx: control_rx,
        }
    }

    async fn wait_for_replies(replies: &Mutex<Vec<String>>, count: usize) -> Vec<String> {
        for _ in 0..500 {
            let current = replies.lock().unwrap().clone();
            if current.len() >= count {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("expected {} replies, got {:?}", count, replies.lock().unwrap());
    }

    async fn stop(fixture: Fixture) {
        let _ = fixture.shutdown_tx.send(());
        for task in fixture.tasks {
            task.await.unwrap();
        }
    }

    fn make_init(instrument: u32) -> ProducerCall {
        ProducerCall::Init {
            instrument,
            timestamp: "2024.03.01 10:00:00".to_string(),
            ask: 1.23456,
            bid: 1.23450,
            environment: 2,
        }
    }

    #[tokio::test]
    async fn test_init_tick_deinit_lifecycle() {
        let fixture = start(
            Instrument::EurUsd,
            vec![
                make_init(0),
                ProducerCall::Tick {
                    instrument: 0,
                    timestamp: "2024.03.01 10:00:01".to_string(),
                    ask: 1.23470,
                    bid: 1.23450,
                },
                ProducerCall::DeInit {
                    instrument: 0,
                    reason: 4,
                },
            ],
        );

        let replies = wait_for_replies(&fixture.replies, 2).await;
        assert_eq!(replies, vec![OK_REPLY.to_string(), OK_REPLY.to_string()]);

        // DeInit has no reply; poll the coordinator for its effect
        for _ in 0..500 {
            if !fixture.coordinator.record(Instrument::EurUsd).is_connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let record = fixture.coordinator.record(Instrument::EurUsd);
        assert!(!record.is_connected);
        assert_eq!(
            record.last_disconnect_reason,
            Some(DeInitReason::ChartClosed)
        );

        // Init sample and tick both reach the persistence buffer
        for _ in 0..500 {
            if fixture.pipeline.buffered_len().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(fixture.pipeline.buffered_len().await, 2);
        stop(fixture).await;
    }

    #[tokio::test]
    async fn test_unknown_instrument_ordinal_fails_single_call() {
        let fixture = start(Instrument::EurUsd, vec![make_init(9)]);

        let replies = wait_for_replies(&fixture.replies, 1).await;
        assert!(replies[0].contains("unknown instrument ordinal: 9"));
        assert!(!fixture.coordinator.record(Instrument::EurUsd).is_connected);
        stop(fixture).await;
    }

    #[tokio::test]
    async fn test_wrong_channel_ordinal_rejected() {
        let fixture = start(
            Instrument::EurUsd,
            vec![ProducerCall::Tick {
                // GBPUSD ordinal on the EURUSD channel
                instrument: 1,
                timestamp: "2024.03.01 10:00:00".to_string(),
                ask: 1.23456,
                bid: 1.23450,
            }],
        );

        let replies = wait_for_replies(&fixture.replies, 1).await;
        assert!(replies[0].contains("not served by the EURUSD channel"));
        assert_eq!(fixture.pipeline.buffered_len().await, 0);
        stop(fixture).await;
    }

    #[tokio::test]
    async fn test_reconnect_while_connected_replies_error() {
        let fixture = start(Instrument::GbpUsd, vec![make_init(1), make_init(1)]);

        let replies = wait_for_replies(&fixture.replies, 2).await;
        assert_eq!(replies[0], OK_REPLY);
        assert!(replies[1].contains("already connected"));

        // The rejected reconnect did not disturb the first sample
        assert_eq!(fixture.pipeline.buffered_len().await, 1);
        stop(fixture).await;
    }

    #[tokio::test]
    async fn test_malformed_init_timestamp_replies_error() {
        let fixture = start(
            Instrument::UsdJpy,
            vec![ProducerCall::Init {
                instrument: 2,
                timestamp: "yesterday".to_string(),
                ask: 130.456,
                bid: 130.450,
                environment: 2,
            }],
        );

        let replies = wait_for_replies(&fixture.replies, 1).await;
        assert!(replies[0].contains("malformed timestamp"));
        stop(fixture).await;
    }

    #[tokio::test]
    async fn test_sixth_init_opens_downstream() {
        let metrics = Arc::new(ServiceMetrics::new());
        let (forward, _quote_rx, mut control_rx) = ForwardHandle::channel();
        let (pipeline, worker) = QuotationPipeline::new(
            Arc::new(NullGateway),
            forward.clone(),
            metrics,
            PipelineConfig::default(),
        );
        let coordinator = Arc::new(ConnectionCoordinator::new());
        let (fault_tx, _fault_rx) = mpsc::unbounded_channel();

        let (shutdown_tx, _) = broadcast::channel(1);
        let worker_task = tokio::spawn(worker.run(shutdown_tx.subscribe()));

        // Drive six handlers directly, one per instrument
        for instrument in Instrument::ALL {
            let mut handler = ConnectionHandler {
                instrument,
                pipeline: pipeline.clone(),
                coordinator: coordinator.clone(),
                forward: forward.clone(),
                faults: fault_tx.clone(),
            };
            let reply = handler
                .handle_init(
                    instrument.index() as u32,
                    "2024.03.01 10:00:00".to_string(),
                    1.23456,
                    1.23450,
                    2,
                )
                .await;
            assert_eq!(reply, OK_REPLY);
        }

        assert_eq!(
            control_rx.recv().await,
            Some(crate::forward::SinkControl::Open)
        );
        assert!(control_rx.try_recv().is_err(), "rising edge fires once");

        let _ = shutdown_tx.send(());
        worker_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_environment_mismatch_escalates_to_fault_channel() {
        let metrics = Arc::new(ServiceMetrics::new());
        let (forward, _quote_rx, _control_rx) = ForwardHandle::channel();
        let (pipeline, worker) = QuotationPipeline::new(
            Arc::new(NullGateway),
            forward.clone(),
            metrics,
            PipelineConfig::default(),
        );
        let coordinator = Arc::new(ConnectionCoordinator::new());
        let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();

        let (shutdown_tx, _) = broadcast::channel(1);
        let worker_task = tokio::spawn(worker.run(shutdown_tx.subscribe()));

        for instrument in Instrument::ALL {
            let mut handler = ConnectionHandler {
                instrument,
                pipeline: pipeline.clone(),
                coordinator: coordinator.clone(),
                forward: forward.clone(),
                faults: fault_tx.clone(),
            };
            // The last producer declares a different environment
            let environment = if instrument == Instrument::UsdCad { 0 } else { 2 };
            let reply = handler
                .handle_init(
                    instrument.index() as u32,
                    "2024.03.01 10:00:00".to_string(),
                    1.23456,
                    1.23450,
                    environment,
                )
                .await;
            if instrument == Instrument::UsdCad {
                assert!(reply.contains("environment mismatch"));
            } else {
                assert_eq!(reply, OK_REPLY);
            }
        }

        let fault = fault_rx.recv().await.unwrap();
        assert!(matches!(fault, MediatorError::Consistency(_)));

        let _ = shutdown_tx.send(());
        worker_task.await.unwrap();
    }
}
