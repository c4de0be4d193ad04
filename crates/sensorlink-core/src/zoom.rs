//! Multi-resolution recorder.
//!
//! A [`ZoomRecorder`] decimates one time series into a pyramid of tiers.
//! Tier 0 holds the raw points (written by the caller, see
//! [`RecordingSession`](crate::session::RecordingSession)). Every
//! `buffer_size` points of tier N are reduced to two points of tier N+1: the
//! minimum and the maximum of that pass, each with its own timestamp. A graph
//! of any time range can then be drawn from the coarsest tier that still has
//! enough points, without ever loading more than a few hundred of them.
//!
//! Tiers live in a vector indexed by tier number and are allocated on first
//! use, so memory is bounded by `log_{buffer_size/2}(points)` accumulators.

use serde::{Deserialize, Serialize};
use tracing::debug;

use sensorlink_types::RecordingSink;

use crate::error::{Error, Result};

/// Recorder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Points per pass of each tier. Default: 100.
    pub buffer_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { buffer_size: 100 }
    }
}

impl RecorderConfig {
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Validate the configuration.
    ///
    /// `buffer_size` must be at least 3: a pass is reduced to two points, so
    /// a smaller pass would refill the next tier on every flush without end.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < 3 {
            return Err(Error::invalid_config(format!(
                "buffer_size must be >= 3, got {}",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Point {
    timestamp: i64,
    value: f64,
}

/// Accumulator of one pass of one tier.
#[derive(Debug, Clone, Copy, Default)]
struct Tier {
    seen_this_pass: usize,
    min: Point,
    max: Point,
}

impl Tier {
    fn accept(&mut self, point: Point) {
        if self.seen_this_pass == 0 {
            self.min = point;
            self.max = point;
        } else {
            if point.value < self.min.value {
                self.min = point;
            }
            // `>=` keeps min and max on different points once a pass has two.
            if point.value >= self.max.value {
                self.max = point;
            }
        }
        self.seen_this_pass += 1;
    }

    /// Reset and return the points of this pass in timestamp order.
    fn drain(&mut self) -> Vec<Point> {
        let points = match self.seen_this_pass {
            0 => Vec::new(),
            1 => vec![self.min],
            _ if self.max.timestamp < self.min.timestamp => vec![self.max, self.min],
            _ => vec![self.min, self.max],
        };
        *self = Tier::default();
        points
    }
}

/// Decimating recorder for one sensor of one run.
///
/// ```
/// use sensorlink_core::zoom::{RecorderConfig, ZoomRecorder};
/// use sensorlink_types::MemorySink;
///
/// let mut sink = MemorySink::new();
/// let mut recorder = ZoomRecorder::new("run", "temp", RecorderConfig::default().buffer_size(4)).unwrap();
/// for (i, v) in [3.0, 9.0, 1.0, 5.0].into_iter().enumerate() {
///     recorder.add_data(&mut sink, i as i64, v);
/// }
/// let tier1: Vec<_> = sink.tier(1).iter().map(|p| p.value).collect();
/// assert_eq!(tier1, vec![9.0, 1.0]);
/// ```
#[derive(Debug, Clone)]
pub struct ZoomRecorder {
    run_id: String,
    sensor_id: String,
    buffer_size: usize,
    /// `tiers[i]` accumulates tier `i` points and emits into tier `i + 1`.
    tiers: Vec<Tier>,
    highest_flushed: u32,
}

impl ZoomRecorder {
    /// Create a recorder. Fails if the configuration is invalid.
    pub fn new(
        run_id: impl Into<String>,
        sensor_id: impl Into<String>,
        config: RecorderConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            run_id: run_id.into(),
            sensor_id: sensor_id.into(),
            buffer_size: config.buffer_size,
            tiers: Vec::new(),
            highest_flushed: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Decimation factor between neighbouring tiers.
    pub fn zoom_level_between_tiers(&self) -> u32 {
        u32::try_from(self.buffer_size / 2).unwrap_or(u32::MAX)
    }

    /// Feed one raw point.
    ///
    /// The point itself is not written; only the decimated tiers are.
    pub fn add_data<S>(&mut self, sink: &mut S, timestamp_millis: i64, value: f64)
    where
        S: RecordingSink + ?Sized,
    {
        self.push(
            sink,
            0,
            Point {
                timestamp: timestamp_millis,
                value,
            },
        );
    }

    /// Emit every partially filled pass.
    ///
    /// Tiers are flushed from finest to coarsest and each partial pass is
    /// forwarded into the next tier before that tier is flushed, so nothing
    /// buffered is lost. The coarsest tier does not forward. Only the set of
    /// emitted points is guaranteed, not the order in which the sink sees
    /// them. Calling this again without new data emits nothing.
    pub fn flush_all_tiers<S>(&mut self, sink: &mut S)
    where
        S: RecordingSink + ?Sized,
    {
        let mut index = 0;
        while index < self.tiers.len() {
            let forward = index + 1 < self.tiers.len();
            self.flush(sink, index, forward);
            index += 1;
        }
    }

    /// Highest tier that has received points, or 0 if none has.
    pub fn count_tiers(&self) -> u32 {
        self.highest_flushed
    }

    /// Number of accumulators currently allocated.
    pub fn allocated_tiers(&self) -> usize {
        self.tiers.len()
    }

    /// Drop all buffered state, including every allocated tier.
    pub fn clear(&mut self) {
        self.tiers.clear();
        self.highest_flushed = 0;
    }

    fn push<S>(&mut self, sink: &mut S, index: usize, point: Point)
    where
        S: RecordingSink + ?Sized,
    {
        if index >= self.tiers.len() {
            debug!(
                "Allocating tier {} for {}/{}",
                index + 1,
                self.run_id,
                self.sensor_id
            );
            self.tiers.resize_with(index + 1, Tier::default);
        }

        let tier = &mut self.tiers[index];
        tier.accept(point);
        if tier.seen_this_pass >= self.buffer_size {
            self.flush(sink, index, true);
        }
    }

    fn flush<S>(&mut self, sink: &mut S, index: usize, forward: bool)
    where
        S: RecordingSink + ?Sized,
    {
        let points = self.tiers[index].drain();
        if points.is_empty() {
            return;
        }

        let tier = u32::try_from(index + 1).unwrap_or(u32::MAX);
        for point in &points {
            sink.add_scalar_reading(
                &self.run_id,
                &self.sensor_id,
                tier,
                point.timestamp,
                point.value,
            );
        }
        self.highest_flushed = self.highest_flushed.max(tier);

        if forward {
            for point in points {
                self.push(sink, index + 1, point);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sensorlink_types::MemorySink;

    fn recorder(buffer_size: usize) -> ZoomRecorder {
        ZoomRecorder::new("run", "sensor", RecorderConfig { buffer_size }).unwrap()
    }

    fn feed(recorder: &mut ZoomRecorder, sink: &mut MemorySink, values: &[f64]) {
        for (i, &v) in values.iter().enumerate() {
            recorder.add_data(sink, i as i64 * 10, v);
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(RecorderConfig::default().validate().is_ok());
        assert_eq!(RecorderConfig::default().buffer_size, 100);
        let err = ZoomRecorder::new("r", "s", RecorderConfig { buffer_size: 2 }).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_full_pass_emits_min_and_max_in_time_order() {
        let mut sink = MemorySink::new();
        let mut r = recorder(5);
        feed(&mut r, &mut sink, &[4.0, 8.0, 2.0, 6.0, 5.0]);

        let points: Vec<_> = sink
            .tier(1)
            .iter()
            .map(|p| (p.timestamp_millis, p.value))
            .collect();
        assert_eq!(points, vec![(10, 8.0), (20, 2.0)]);
        assert_eq!(r.count_tiers(), 1);
    }

    #[test]
    fn test_constant_values_emit_two_distinct_points() {
        let mut sink = MemorySink::new();
        let mut r = recorder(3);
        feed(&mut r, &mut sink, &[1.0, 1.0, 1.0]);
        let ts: Vec<_> = sink.tier(1).iter().map(|p| p.timestamp_millis).collect();
        assert_eq!(ts, vec![0, 20]);
    }

    #[test]
    fn test_cascades_into_coarser_tiers() {
        let mut sink = MemorySink::new();
        let mut r = recorder(4);
        // 8 raw points -> 4 tier-1 points -> 2 tier-2 points.
        feed(&mut r, &mut sink, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        assert_eq!(sink.tier_len(1), 4);
        assert_eq!(sink.tier_len(2), 2);
        let tier2: Vec<_> = sink.tier(2).iter().map(|p| p.value).collect();
        assert_eq!(tier2, vec![1.0, 8.0]);
        assert_eq!(r.count_tiers(), 2);
        assert_eq!(r.allocated_tiers(), 3);
    }

    #[test]
    fn test_flush_emits_partial_pass() {
        let mut sink = MemorySink::new();
        let mut r = recorder(10);
        feed(&mut r, &mut sink, &[3.0]);
        assert_eq!(sink.points.len(), 0);
        assert_eq!(r.count_tiers(), 0);

        r.flush_all_tiers(&mut sink);
        assert_eq!(sink.tier_len(1), 1);
        assert_eq!(sink.tier(1)[0].value, 3.0);
    }

    #[test]
    fn test_flush_on_empty_recorder_is_noop() {
        let mut sink = MemorySink::new();
        let mut r = recorder(4);
        r.flush_all_tiers(&mut sink);
        assert!(sink.points.is_empty());
        assert_eq!(r.count_tiers(), 0);
    }

    #[test]
    fn test_flush_forwards_partial_passes_upward() {
        let mut sink = MemorySink::new();
        let mut r = recorder(4);
        // One full pass (tier 1 gets 2 points) plus one leftover.
        feed(&mut r, &mut sink, &[1.0, 9.0, 5.0, 5.0, 0.0]);
        r.flush_all_tiers(&mut sink);

        // Tier 1: 2 from the full pass + 1 from the flushed partial pass.
        assert_eq!(sink.tier_len(1), 3);
        // Tier 2: those three reduced to min and max.
        let tier2: Vec<_> = sink
            .tier(2)
            .iter()
            .map(|p| (p.timestamp_millis, p.value))
            .collect();
        assert_eq!(tier2, vec![(10, 9.0), (40, 0.0)]);
        assert_eq!(r.count_tiers(), 2);
        assert_eq!(r.allocated_tiers(), 2);
    }

    #[test]
    fn test_clear_drops_tiers() {
        let mut sink = MemorySink::new();
        let mut r = recorder(3);
        feed(&mut r, &mut sink, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(r.allocated_tiers() > 0);

        r.clear();
        assert_eq!(r.allocated_tiers(), 0);
        assert_eq!(r.count_tiers(), 0);
        let before = sink.points.len();
        r.flush_all_tiers(&mut sink);
        assert_eq!(sink.points.len(), before);
    }

    #[test]
    fn test_zoom_level_between_tiers() {
        assert_eq!(recorder(100).zoom_level_between_tiers(), 50);
    }

    proptest! {
        #[test]
        fn prop_first_tier_emission_count(
            values in proptest::collection::vec(-1e3..1e3f64, 0..500),
            buffer_size in 3usize..40,
        ) {
            let mut sink = MemorySink::new();
            let mut r = recorder(buffer_size);
            feed(&mut r, &mut sink, &values);

            let full = values.len() / buffer_size;
            prop_assert_eq!(sink.tier_len(1), 2 * full);

            r.flush_all_tiers(&mut sink);
            let remainder = values.len() % buffer_size;
            prop_assert_eq!(sink.tier_len(1), 2 * full + remainder.min(2));
        }

        #[test]
        fn prop_flush_all_tiers_is_idempotent(
            values in proptest::collection::vec(-1e3..1e3f64, 0..500),
            buffer_size in 3usize..20,
        ) {
            let mut sink = MemorySink::new();
            let mut r = recorder(buffer_size);
            feed(&mut r, &mut sink, &values);

            r.flush_all_tiers(&mut sink);
            let after_first = sink.points.len();
            r.flush_all_tiers(&mut sink);
            prop_assert_eq!(sink.points.len(), after_first);
        }

        #[test]
        fn prop_emitted_points_bound_their_pass(
            values in proptest::collection::vec(-1e3..1e3f64, 1..200),
            buffer_size in 3usize..20,
        ) {
            let mut sink = MemorySink::new();
            let mut r = recorder(buffer_size);
            feed(&mut r, &mut sink, &values);

            for (pass, chunk) in values.chunks_exact(buffer_size).enumerate() {
                let min = chunk.iter().copied().fold(f64::INFINITY, f64::min);
                let max = chunk.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let emitted = &sink.tier(1)[2 * pass..2 * pass + 2];
                let mut got = [emitted[0].value, emitted[1].value];
                got.sort_by(f64::total_cmp);
                prop_assert_eq!(got, [min, max]);
                prop_assert!(emitted[0].timestamp_millis < emitted[1].timestamp_millis);
            }
        }
    }
}
