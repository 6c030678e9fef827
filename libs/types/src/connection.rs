//! Producer connection lifecycle types
//!
//! Producers declare their execution environment when they connect and a
//! reason code when they disconnect. All simultaneously-connected producers
//! must agree on the environment; the coordinator enforces that.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution environment a producer declares on `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Production = 0,
    Development = 1,
    Testing = 2,
}

impl Environment {
    /// Decode a raw wire ordinal.
    pub fn from_wire(ordinal: u32) -> Option<Self> {
        match ordinal {
            0 => Some(Environment::Production),
            1 => Some(Environment::Development),
            2 => Some(Environment::Testing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "PRODUCTION",
            Environment::Development => "DEVELOPMENT",
            Environment::Testing => "TESTING",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason code a producer reports on `DeInit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeInitReason {
    Terminated = 0,
    Removed = 1,
    Recompiled = 2,
    ChartChanged = 3,
    ChartClosed = 4,
    ParametersChanged = 5,
    AccountChanged = 6,
}

impl DeInitReason {
    /// Decode a raw wire ordinal.
    pub fn from_wire(ordinal: u32) -> Option<Self> {
        match ordinal {
            0 => Some(DeInitReason::Terminated),
            1 => Some(DeInitReason::Removed),
            2 => Some(DeInitReason::Recompiled),
            3 => Some(DeInitReason::ChartChanged),
            4 => Some(DeInitReason::ChartClosed),
            5 => Some(DeInitReason::ParametersChanged),
            6 => Some(DeInitReason::AccountChanged),
            _ => None,
        }
    }
}

impl fmt::Display for DeInitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per-instrument connection state, owned exclusively by the coordinator.
///
/// Created at process start with all fields cleared; `is_connected` flips
/// on `Init`/`DeInit`, `environment` is present exactly while connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub is_connected: bool,
    pub environment: Option<Environment>,
    pub last_disconnect_reason: Option<DeInitReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_wire() {
        assert_eq!(Environment::from_wire(0), Some(Environment::Production));
        assert_eq!(Environment::from_wire(2), Some(Environment::Testing));
        assert_eq!(Environment::from_wire(3), None);
    }

    #[test]
    fn test_deinit_reason_from_wire() {
        assert_eq!(DeInitReason::from_wire(1), Some(DeInitReason::Removed));
        assert_eq!(DeInitReason::from_wire(6), Some(DeInitReason::AccountChanged));
        assert_eq!(DeInitReason::from_wire(7), None);
    }

    #[test]
    fn test_record_default_is_disconnected() {
        let record = ConnectionRecord::default();
        assert!(!record.is_connected);
        assert_eq!(record.environment, None);
        assert_eq!(record.last_disconnect_reason, None);
    }
}
