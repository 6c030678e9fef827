//! Quotation Mediation Service
//!
//! Sits between one price-feed producer per instrument and a single
//! downstream consumer, while durably archiving every observed price:
//! - Per-instrument ingestion listeners (one producer connection at a time)
//! - Cross-instrument connection-state coordination with aggregate edges
//! - Central normalization / ordering / batching pipeline
//! - Real-time forwarding to the downstream consumer
//! - Batched persistence through an injected gateway
//!
//! # Architecture
//!
//! ```text
//!  Producer ×6
//!      │
//!  ┌───▼──────┐     ┌─────────────┐
//!  │ Listener │────▶│ Coordinator │  connect/disconnect edges
//!  └───┬──────┘     └──────┬──────┘
//!      │ raw ticks         │ lifecycle
//!  ┌───▼──────────┐        │
//!  │   Pipeline   │        │   normalize → order → dedup → batch
//!  └───┬──────┬───┘        │
//!      │      │            │
//!  ┌───▼────┐ │      ┌─────▼─────┐
//!  │Persist │ │      │ Forwarding│──▶ downstream consumer
//!  │Gateway │ └─────▶│   Sink    │◀── acknowledgements
//!  └────────┘        └───────────┘
//! ```

pub mod coordinator;
pub mod forward;
pub mod listener;
pub mod metrics;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod runner;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
