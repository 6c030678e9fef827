//! Error taxonomy for the mediation pipeline
//!
//! Four classes with distinct handling policies: protocol errors are
//! rejected at the offending call and reported to that caller only;
//! transport errors are expected operational churn; consistency violations
//! are fatal and must reach the supervisory layer; persistence errors are
//! retried without dropping accepted data.

use crate::connection::Environment;
use crate::instrument::Instrument;
use thiserror::Error;

/// Top-level mediator error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediatorError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("consistency violation: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Malformed or out-of-order requests from a single producer call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("malformed timestamp: {text:?}")]
    MalformedTimestamp { text: String },

    #[error("unknown instrument ordinal: {ordinal}")]
    UnknownInstrument { ordinal: u32 },

    #[error("instrument {received} not served by the {expected} channel")]
    WrongChannel {
        expected: Instrument,
        received: Instrument,
    },

    #[error("unknown environment ordinal: {ordinal}")]
    UnknownEnvironment { ordinal: u32 },

    #[error("unknown deinit reason ordinal: {ordinal}")]
    UnknownDeInitReason { ordinal: u32 },

    #[error("invalid price: {value}")]
    InvalidPrice { value: f64 },

    #[error("producer already connected: {instrument}")]
    AlreadyConnected { instrument: Instrument },

    #[error("producer not connected: {instrument}")]
    NotConnected { instrument: Instrument },
}

/// Channel-level failures; callers log and re-enter their waiting loop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel unavailable")]
    ChannelUnavailable,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport failure: {detail}")]
    Failed { detail: String },
}

/// Cross-instrument invariant breaches; fatal to ingestion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("environment mismatch: {instrument} reports {found}, expected {expected}")]
    EnvironmentMismatch {
        instrument: Instrument,
        expected: Environment,
        found: Environment,
    },
}

/// Durable-storage failures; recovered by re-buffering and retrying
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("save failed: {detail}")]
    SaveFailed { detail: String },

    #[error("invalid calendar week: {week}")]
    InvalidWeek { week: u32 },

    #[error("timestamp out of range: {timestamp_ms}")]
    InvalidTimestamp { timestamp_ms: i64 },
}
