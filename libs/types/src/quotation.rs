//! Raw ticks and canonical quotations
//!
//! A `RawTick` is a price observation exactly as received from a producer:
//! floating-point ask/bid and a producer-local timestamp string. The
//! pipeline turns it into a `Quotation`, the canonical fixed-point unit
//! flowing to the forwarding and persistence paths.
//!
//! Canonical timestamps are Unix milliseconds UTC; the 1 ms granularity is
//! also the tie-break increment the pipeline uses to keep per-instrument
//! timestamps strictly increasing.

use crate::errors::ProtocolError;
use crate::instrument::Instrument;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Producer timestamp format: `"yyyy.MM.dd HH:mm:ss"`.
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// Parse a producer-local timestamp string into Unix milliseconds UTC.
pub fn parse_timestamp_text(text: &str) -> Result<i64, ProtocolError> {
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map_err(|_| {
        ProtocolError::MalformedTimestamp {
            text: text.to_string(),
        }
    })?;
    Ok(naive.and_utc().timestamp_millis())
}

/// Which side of the quote a price belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Ask,
    Bid,
}

/// A price observation as received from a producer, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub instrument: Instrument,
    /// Producer-local timestamp text, always convertible to UTC.
    pub timestamp_text: String,
    pub ask: f64,
    pub bid: f64,
}

/// The canonical, normalized, fixed-point representation of a tick.
///
/// Within one instrument, consecutive stored quotations carry strictly
/// increasing `timestamp_ms` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quotation {
    pub instrument: Instrument,
    /// Unix milliseconds UTC.
    pub timestamp_ms: i64,
    pub ask_ticks: i64,
    pub bid_ticks: i64,
}

/// Ordering by timestamp, then instrument ordinal. Only the per-instrument
/// ordering is meaningful; the instrument tiebreak keeps `Ord` total.
impl Ord for Quotation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then_with(|| self.instrument.index().cmp(&other.instrument.index()))
    }
}

impl PartialOrd for Quotation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_text() {
        let ms = parse_timestamp_text("2024.03.01 10:15:30").unwrap();
        // 2024-03-01T10:15:30Z
        assert_eq!(ms, 1_709_288_130_000);
    }

    #[test]
    fn test_parse_timestamp_rejects_malformed() {
        for text in ["2024-03-01 10:15:30", "2024.03.01", "garbage", ""] {
            let err = parse_timestamp_text(text).unwrap_err();
            assert!(matches!(err, ProtocolError::MalformedTimestamp { .. }));
        }
    }

    #[test]
    fn test_quotation_ordering_by_timestamp() {
        let base = Quotation {
            instrument: Instrument::EurUsd,
            timestamp_ms: 1_709_288_130_000,
            ask_ticks: 12_346,
            bid_ticks: 12_345,
        };
        let later = Quotation {
            timestamp_ms: base.timestamp_ms + 1,
            ..base
        };

        let mut quotations = vec![later, base];
        quotations.sort();
        assert_eq!(quotations[0].timestamp_ms, base.timestamp_ms);
        assert_eq!(quotations[1].timestamp_ms, later.timestamp_ms);
    }

    #[test]
    fn test_quotation_serialization_roundtrip() {
        let quotation = Quotation {
            instrument: Instrument::UsdJpy,
            timestamp_ms: 1_709_288_130_000,
            ask_ticks: 13_046,
            bid_ticks: 13_045,
        };
        let json = serde_json::to_string(&quotation).unwrap();
        let back: Quotation = serde_json::from_str(&json).unwrap();
        assert_eq!(quotation, back);
    }
}
