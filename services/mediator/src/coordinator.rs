//! Cross-instrument connection-state coordination
//!
//! Tracks each producer's connect/disconnect lifecycle and derives the
//! aggregate "all six connected" state. Aggregate edges are returned as
//! tagged transition values from the mutating call itself, consumed
//! synchronously by the caller — there are no subscriber callbacks.
//!
//! All mutation happens under one exclusive lock spanning the whole
//! per-instrument array: the aggregate check must observe a consistent
//! snapshot across all six instruments.

use std::sync::Mutex;
use tracing::{info, warn};
use types::connection::{ConnectionRecord, DeInitReason, Environment};
use types::errors::{ConsistencyError, MediatorError, ProtocolError};
use types::instrument::Instrument;

/// Aggregate edge carried by a coordinator transition.
///
/// `AllConnected` fires exactly once per full-connect cycle, on the call
/// that connects the last instrument. `Disconnected` fires on the call
/// that breaks a previously-complete set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    None,
    AllConnected { environment: Environment },
    Disconnected { instrument: Instrument },
}

struct CoordinatorState {
    records: [ConnectionRecord; Instrument::COUNT],
    /// Set when the rising edge has fired; cleared by the falling edge.
    all_connected_announced: bool,
    full_connect_cycles: u64,
    disconnects: u64,
}

/// Owner of all per-instrument connection records.
pub struct ConnectionCoordinator {
    state: Mutex<CoordinatorState>,
}

impl ConnectionCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                records: [ConnectionRecord::default(); Instrument::COUNT],
                all_connected_announced: false,
                full_connect_cycles: 0,
                disconnects: 0,
            }),
        }
    }

    /// Register a producer connection for `instrument`.
    ///
    /// Fails with `AlreadyConnected` while the instrument is connected: a
    /// producer must fully disconnect before reconnecting, which enforces
    /// a single writer per instrument. When this call completes the full
    /// set, all declared environments are verified identical; a mismatch
    /// is a fatal consistency violation and suppresses the rising edge.
    pub fn on_init(
        &self,
        instrument: Instrument,
        environment: Environment,
    ) -> Result<ConnectionEvent, MediatorError> {
        let mut state = self.state.lock().expect("coordinator lock poisoned");

        let record = &mut state.records[instrument.index()];
        if record.is_connected {
            return Err(ProtocolError::AlreadyConnected { instrument }.into());
        }
        record.is_connected = true;
        record.environment = Some(environment);
        record.last_disconnect_reason = None;
        info!(
            instrument = %instrument,
            environment = %environment,
            "producer connected"
        );

        if !state.all_connected_announced && state.records.iter().all(|r| r.is_connected) {
            for (index, record) in state.records.iter().enumerate() {
                if let Some(found) = record.environment {
                    if found != environment {
                        let offender = Instrument::ALL[index];
                        warn!(
                            instrument = %offender,
                            found = %found,
                            expected = %environment,
                            "environment mismatch across connected producers"
                        );
                        return Err(ConsistencyError::EnvironmentMismatch {
                            instrument: offender,
                            expected: environment,
                            found,
                        }
                        .into());
                    }
                }
            }
            state.all_connected_announced = true;
            state.full_connect_cycles += 1;
            info!(
                environment = %environment,
                cycle = state.full_connect_cycles,
                "all instruments connected"
            );
            return Ok(ConnectionEvent::AllConnected { environment });
        }

        Ok(ConnectionEvent::None)
    }

    /// Register a producer disconnect for `instrument`.
    ///
    /// Requires the instrument to be connected. Carries the falling edge
    /// when the call breaks a previously-complete set.
    pub fn on_deinit(
        &self,
        instrument: Instrument,
        reason: DeInitReason,
    ) -> Result<ConnectionEvent, MediatorError> {
        let mut state = self.state.lock().expect("coordinator lock poisoned");

        let record = &mut state.records[instrument.index()];
        if !record.is_connected {
            return Err(ProtocolError::NotConnected { instrument }.into());
        }
        record.is_connected = false;
        record.environment = None;
        record.last_disconnect_reason = Some(reason);
        state.disconnects += 1;
        info!(
            instrument = %instrument,
            reason = %reason,
            "producer disconnected"
        );

        if state.all_connected_announced {
            state.all_connected_announced = false;
            return Ok(ConnectionEvent::Disconnected { instrument });
        }

        Ok(ConnectionEvent::None)
    }

    /// Snapshot of one instrument's connection record.
    pub fn record(&self, instrument: Instrument) -> ConnectionRecord {
        let state = self.state.lock().expect("coordinator lock poisoned");
        state.records[instrument.index()]
    }

    /// Number of currently connected instruments.
    pub fn connected_count(&self) -> usize {
        let state = self.state.lock().expect("coordinator lock poisoned");
        state.records.iter().filter(|r| r.is_connected).count()
    }

    /// Whether all six instruments are currently connected.
    pub fn is_all_connected(&self) -> bool {
        let state = self.state.lock().expect("coordinator lock poisoned");
        state.records.iter().all(|r| r.is_connected)
    }

    /// The aggregate environment: present only when all six instruments
    /// are connected and agree on it.
    pub fn aggregate_environment(&self) -> Option<Environment> {
        let state = self.state.lock().expect("coordinator lock poisoned");
        let mut aggregate = None;
        for record in &state.records {
            let environment = record.environment?;
            match aggregate {
                None => aggregate = Some(environment),
                Some(existing) if existing != environment => return None,
                Some(_) => {}
            }
        }
        aggregate
    }

    /// Completed full-connect cycles since process start.
    pub fn full_connect_cycles(&self) -> u64 {
        let state = self.state.lock().expect("coordinator lock poisoned");
        state.full_connect_cycles
    }
}

impl Default for ConnectionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
