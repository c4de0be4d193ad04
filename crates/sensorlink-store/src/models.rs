//! Data models for stored runs.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use sensorlink_types::RunStats;

/// A finished run of one sensor, as listed by
/// [`Store::list_runs`](crate::Store::list_runs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: String,
    pub sensor_id: String,
    pub stats: RunStats,
    /// When the statistics were last written.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
