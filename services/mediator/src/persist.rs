//! Persistence gateway contract and partition naming
//!
//! The storage engine lives outside this service; the pipeline only calls
//! `save` with an ordered batch of quotations. Storage is partitioned by
//! ISO calendar week under the `<year>.<quarter>.<kind>` naming scheme.

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use types::errors::PersistenceError;
use types::quotation::Quotation;

/// Durable-storage collaborator contract.
///
/// `save` receives quotations in pipeline order; implementations must
/// either store the whole batch or fail it — the pipeline re-buffers and
/// retries failed batches.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn save(&self, quotations: &[Quotation]) -> Result<(), PersistenceError>;
}

/// Which stream a partition stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Provider,
    Tick,
}

impl PartitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PartitionKind::Provider => "provider",
            PartitionKind::Tick => "tick",
        }
    }
}

/// Map an ISO week number onto its storage quarter.
///
/// Weeks 1–13 → 1, 14–26 → 2, 27–39 → 3, 40–52 → 4. Week 0 or anything
/// past 52 is invalid input.
pub fn quarter_of_week(week: u32) -> Result<u32, PersistenceError> {
    match week {
        1..=13 => Ok(1),
        14..=26 => Ok(2),
        27..=39 => Ok(3),
        40..=52 => Ok(4),
        _ => Err(PersistenceError::InvalidWeek { week }),
    }
}

/// Partition name for an ISO year and week: `<year>.<quarter>.<kind>`.
pub fn partition_name(
    year: i32,
    week: u32,
    kind: PartitionKind,
) -> Result<String, PersistenceError> {
    let quarter = quarter_of_week(week)?;
    Ok(format!("{}.{}.{}", year, quarter, kind.as_str()))
}

/// Partition name for a canonical quotation timestamp.
pub fn partition_for_timestamp(
    timestamp_ms: i64,
    kind: PartitionKind,
) -> Result<String, PersistenceError> {
    let datetime = Utc
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or(PersistenceError::InvalidTimestamp { timestamp_ms })?;
    let iso = datetime.iso_week();
    partition_name(iso.year(), iso.week(), kind)
}
