//! Persistence sink consumed by the multi-resolution recorder.

use crate::types::RunStats;

/// Destination for recorded points and per-run statistics.
///
/// Calls are fire-and-forget: the recorder does not inspect results, so an
/// implementation that can fail must surface its own errors (log them, count
/// them, or report them out of band).
pub trait RecordingSink {
    /// Persist one point of one tier.
    fn add_scalar_reading(
        &mut self,
        run_id: &str,
        sensor_id: &str,
        tier: u32,
        timestamp_millis: i64,
        value: f64,
    );

    /// Persist the statistics of a finished run.
    fn set_stats(&mut self, run_id: &str, sensor_id: &str, stats: &RunStats);
}

impl<S: RecordingSink + ?Sized> RecordingSink for &mut S {
    fn add_scalar_reading(
        &mut self,
        run_id: &str,
        sensor_id: &str,
        tier: u32,
        timestamp_millis: i64,
        value: f64,
    ) {
        (**self).add_scalar_reading(run_id, sensor_id, tier, timestamp_millis, value);
    }

    fn set_stats(&mut self, run_id: &str, sensor_id: &str, stats: &RunStats) {
        (**self).set_stats(run_id, sensor_id, stats);
    }
}

/// A point as written to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub run_id: String,
    pub sensor_id: String,
    pub tier: u32,
    pub timestamp_millis: i64,
    pub value: f64,
}

/// In-memory sink that keeps everything it is given.
///
/// Useful for tests and for callers that post-process a run before writing
/// it anywhere durable.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub points: Vec<StoredPoint>,
    pub stats: Vec<(String, String, RunStats)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points written at `tier`, in write order.
    pub fn tier(&self, tier: u32) -> Vec<&StoredPoint> {
        self.points.iter().filter(|p| p.tier == tier).collect()
    }

    /// Number of points written at `tier`.
    pub fn tier_len(&self, tier: u32) -> usize {
        self.points.iter().filter(|p| p.tier == tier).count()
    }
}

impl RecordingSink for MemorySink {
    fn add_scalar_reading(
        &mut self,
        run_id: &str,
        sensor_id: &str,
        tier: u32,
        timestamp_millis: i64,
        value: f64,
    ) {
        self.points.push(StoredPoint {
            run_id: run_id.to_string(),
            sensor_id: sensor_id.to_string(),
            tier,
            timestamp_millis,
            value,
        });
    }

    fn set_stats(&mut self, run_id: &str, sensor_id: &str, stats: &RunStats) {
        self.stats
            .push((run_id.to_string(), sensor_id.to_string(), *stats));
    }
}
