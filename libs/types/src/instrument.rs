//! Traded instrument identifiers
//!
//! The mediator serves a fixed, closed set of six currency pairs. Each
//! instrument has a dense 0-based ordinal used as an array index throughout
//! the service, and a fixed-point price multiplier: 100,000 for 4-decimal
//! pairs, 1,000 for 3-decimal yen pairs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six mediated currency pairs.
///
/// Discriminants are the wire ordinals producers send; they double as the
/// dense array index for per-instrument state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    EurUsd = 0,
    GbpUsd = 1,
    UsdJpy = 2,
    UsdChf = 3,
    AudUsd = 4,
    UsdCad = 5,
}

impl Instrument {
    /// Number of mediated instruments.
    pub const COUNT: usize = 6;

    /// All instruments in ordinal order.
    pub const ALL: [Instrument; Instrument::COUNT] = [
        Instrument::EurUsd,
        Instrument::GbpUsd,
        Instrument::UsdJpy,
        Instrument::UsdChf,
        Instrument::AudUsd,
        Instrument::UsdCad,
    ];

    /// Dense 0-based index for per-instrument arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up an instrument by its dense index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Decode a raw wire ordinal. Unknown ordinals are a protocol error
    /// at the caller's boundary.
    pub fn from_wire(ordinal: u32) -> Option<Self> {
        Self::from_index(ordinal as usize)
    }

    /// Fixed-point multiplier: raw price × multiplier yields integral
    /// price units before tick rounding.
    pub fn multiplier(self) -> i64 {
        match self {
            Instrument::UsdJpy => 1_000,
            _ => 100_000,
        }
    }

    /// Canonical symbol string.
    pub fn as_str(self) -> &'static str {
        match self {
            Instrument::EurUsd => "EURUSD",
            Instrument::GbpUsd => "GBPUSD",
            Instrument::UsdJpy => "USDJPY",
            Instrument::UsdChf => "USDCHF",
            Instrument::AudUsd => "AUDUSD",
            Instrument::UsdCad => "USDCAD",
        }
    }

    /// Address of the instrument-scoped ingestion channel.
    pub fn channel_name(self) -> String {
        format!("IndicatorToMediator_{}", self.as_str())
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roundtrip() {
        for instrument in Instrument::ALL {
            assert_eq!(Instrument::from_index(instrument.index()), Some(instrument));
        }
    }

    #[test]
    fn test_from_wire_rejects_unknown() {
        assert_eq!(Instrument::from_wire(0), Some(Instrument::EurUsd));
        assert_eq!(Instrument::from_wire(5), Some(Instrument::UsdCad));
        assert_eq!(Instrument::from_wire(6), None);
        assert_eq!(Instrument::from_wire(u32::MAX), None);
    }

    #[test]
    fn test_multipliers() {
        assert_eq!(Instrument::EurUsd.multiplier(), 100_000);
        assert_eq!(Instrument::UsdJpy.multiplier(), 1_000);
        assert_eq!(Instrument::UsdCad.multiplier(), 100_000);
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(
            Instrument::EurUsd.channel_name(),
            "IndicatorToMediator_EURUSD"
        );
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&Instrument::UsdJpy).unwrap();
        assert_eq!(json, "\"USDJPY\"");
        let back: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Instrument::UsdJpy);
    }
}
