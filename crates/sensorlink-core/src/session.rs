//! Recording sessions.
//!
//! A [`RecordingSession`] is the end of the acquisition pipeline for one
//! sensor of one run: decoded samples are filtered, written raw at tier 0,
//! decimated by a [`ZoomRecorder`], summarized into [`RunStats`], and handed
//! to every registered [`SensorObserver`].

use std::fmt;

use tracing::{debug, info};

use sensorlink_types::{CharProperties, PayloadFormat, RecordingSink, RunStats, SensorData};

use crate::error::Result;
use crate::filter::{Identity, ValueFilter};
use crate::zoom::{RecorderConfig, ZoomRecorder};

/// Receives every accepted sample, after filtering.
pub trait SensorObserver: Send {
    fn on_new_data(&mut self, timestamp_millis: i64, data: &SensorData);
}

impl<F> SensorObserver for F
where
    F: FnMut(i64, &SensorData) + Send,
{
    fn on_new_data(&mut self, timestamp_millis: i64, data: &SensorData) {
        self(timestamp_millis, data)
    }
}

/// Running minimum, maximum and mean of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsAccumulator {
    minimum: f64,
    maximum: f64,
    sum: f64,
    count: u64,
    first_timestamp: i64,
    last_timestamp: i64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, timestamp_millis: i64, value: f64) {
        if self.count == 0 {
            self.minimum = value;
            self.maximum = value;
            self.first_timestamp = timestamp_millis;
        } else {
            self.minimum = self.minimum.min(value);
            self.maximum = self.maximum.max(value);
        }
        self.sum += value;
        self.count += 1;
        self.last_timestamp = timestamp_millis;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Snapshot as [`RunStats`]; all zero when nothing was added.
    pub fn to_stats(&self, zoom_tiers: u32, zoom_level_between_tiers: u32) -> RunStats {
        if self.count == 0 {
            return RunStats {
                zoom_tiers,
                zoom_level_between_tiers,
                ..RunStats::default()
            };
        }
        RunStats {
            minimum: self.minimum,
            maximum: self.maximum,
            average: self.sum / self.count as f64,
            count: self.count,
            total_duration_millis: self.last_timestamp - self.first_timestamp,
            zoom_tiers,
            zoom_level_between_tiers,
        }
    }
}

/// Filter, record and observe one sensor of one run.
///
/// ```
/// use sensorlink_core::session::RecordingSession;
/// use sensorlink_core::zoom::RecorderConfig;
/// use sensorlink_types::{CharProperties, MemorySink};
///
/// let config = RecorderConfig::default().buffer_size(3);
/// let mut session = RecordingSession::new("run-1", "temp", MemorySink::new(), config).unwrap();
/// session.record(0, 20.0, CharProperties::default());
/// session.record(1000, 22.0, CharProperties::default());
///
/// let (stats, sink) = session.stop();
/// assert_eq!(stats.count, 2);
/// assert_eq!(stats.average, 21.0);
/// assert_eq!(sink.tier_len(0), 2);
/// assert_eq!(sink.tier_len(1), 2);
/// ```
pub struct RecordingSession<S: RecordingSink> {
    run_id: String,
    sensor_id: String,
    sink: S,
    filter: Box<dyn ValueFilter>,
    recorder: ZoomRecorder,
    stats: StatsAccumulator,
    observers: Vec<Box<dyn SensorObserver>>,
}

impl<S: RecordingSink> fmt::Debug for RecordingSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("run_id", &self.run_id)
            .field("sensor_id", &self.sensor_id)
            .field("recorder", &self.recorder)
            .field("stats", &self.stats)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl<S: RecordingSink> RecordingSession<S> {
    /// Start a session writing into `sink`.
    pub fn new(
        run_id: impl Into<String>,
        sensor_id: impl Into<String>,
        sink: S,
        config: RecorderConfig,
    ) -> Result<Self> {
        let run_id = run_id.into();
        let sensor_id = sensor_id.into();
        let recorder = ZoomRecorder::new(run_id.clone(), sensor_id.clone(), config)?;
        info!("Recording {}/{} started", run_id, sensor_id);
        Ok(Self {
            run_id,
            sensor_id,
            sink,
            filter: Box::new(Identity),
            recorder,
            stats: StatsAccumulator::new(),
            observers: Vec::new(),
        })
    }

    /// Replace the filter applied to raw values.
    #[must_use]
    pub fn with_filter(mut self, filter: impl ValueFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn add_observer(&mut self, observer: impl SensorObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn recorder(&self) -> &ZoomRecorder {
        &self.recorder
    }

    /// Statistics so far, as they would be written by [`stop`](Self::stop).
    pub fn stats(&self) -> RunStats {
        self.stats.to_stats(
            self.recorder.count_tiers(),
            self.recorder.zoom_level_between_tiers(),
        )
    }

    /// Record one raw sample and return the filtered value.
    ///
    /// Returns `None`, recording nothing, when the filter produces a
    /// non-finite value.
    pub fn record(&mut self, timestamp_millis: i64, raw: f64, flags: CharProperties) -> Option<f64> {
        let value = self.filter.filter(timestamp_millis, raw);
        if !value.is_finite() {
            debug!(
                "Dropping non-finite value for {}/{} at {}",
                self.run_id, self.sensor_id, timestamp_millis
            );
            return None;
        }

        self.sink
            .add_scalar_reading(&self.run_id, &self.sensor_id, 0, timestamp_millis, value);
        self.recorder.add_data(&mut self.sink, timestamp_millis, value);
        self.stats.add(timestamp_millis, value);

        let data = SensorData { value, raw, flags };
        for observer in &mut self.observers {
            observer.on_new_data(timestamp_millis, &data);
        }
        Some(value)
    }

    /// Decode a payload and record it.
    pub fn record_payload(
        &mut self,
        timestamp_millis: i64,
        format: PayloadFormat,
        payload: &[u8],
        flags: CharProperties,
    ) -> Result<Option<f64>> {
        let raw = format.decode(payload)?;
        Ok(self.record(timestamp_millis, raw, flags))
    }

    /// Flush every tier, write the run statistics and return them with the sink.
    pub fn stop(mut self) -> (RunStats, S) {
        self.recorder.flush_all_tiers(&mut self.sink);
        let stats = self.stats();
        self.sink.set_stats(&self.run_id, &self.sensor_id, &stats);
        info!(
            "Recording {}/{} stopped: {} point(s), {} tier(s)",
            self.run_id, self.sensor_id, stats.count, stats.zoom_tiers
        );
        (stats, self.sink)
    }

    /// Abandon the run without flushing or writing statistics.
    ///
    /// Points already written to the sink stay there; removing them is up to
    /// the sink's owner.
    pub fn discard(mut self) -> S {
        info!("Recording {}/{} discarded", self.run_id, self.sensor_id);
        self.recorder.clear();
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ScaleFilter, ScaleRange};
    use sensorlink_types::MemorySink;
    use std::sync::{Arc, Mutex};

    fn session(buffer_size: usize) -> RecordingSession<MemorySink> {
        RecordingSession::new(
            "run",
            "sensor",
            MemorySink::new(),
            RecorderConfig::default().buffer_size(buffer_size),
        )
        .unwrap()
    }

    #[test]
    fn test_stats_accumulator() {
        let mut acc = StatsAccumulator::new();
        assert!(acc.is_empty());
        assert_eq!(acc.to_stats(0, 50), RunStats {
            zoom_level_between_tiers: 50,
            ..RunStats::default()
        });

        acc.add(100, 4.0);
        acc.add(200, -2.0);
        acc.add(400, 7.0);
        let stats = acc.to_stats(1, 50);
        assert_eq!(stats.minimum, -2.0);
        assert_eq!(stats.maximum, 7.0);
        assert_eq!(stats.average, 3.0);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.total_duration_millis, 300);
    }

    #[test]
    fn test_record_writes_raw_and_decimated_tiers() {
        let mut s = session(10);
        for i in 0..10 {
            s.record(i * 100, i as f64, CharProperties::default());
        }
        assert_eq!(s.sink().tier_len(1), 2);
        let (stats, sink) = s.stop();

        assert_eq!(sink.tier_len(0), 10);
        assert_eq!(sink.tier_len(1), 2);
        // Forwarded pass flushed on stop.
        assert_eq!(sink.tier_len(2), 2);
        assert_eq!(stats.count, 10);
        assert_eq!(stats.total_duration_millis, 900);
        assert_eq!(stats.zoom_tiers, 2);
        assert_eq!(stats.zoom_level_between_tiers, 5);
        assert_eq!(sink.stats.len(), 1);
        assert_eq!(sink.stats[0].2, stats);
    }

    #[test]
    fn test_filter_applies_before_recording() {
        let scale = ScaleFilter::new(ScaleRange::new(0.0, 10.0), ScaleRange::new(0.0, 100.0))
            .unwrap();
        let mut s = session(10).with_filter(scale);
        assert_eq!(s.record(0, 2.5, CharProperties::default()), Some(25.0));
        assert_eq!(s.sink().tier(0)[0].value, 25.0);
    }

    #[test]
    fn test_observers_see_filtered_and_raw() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let scale =
            ScaleFilter::new(ScaleRange::new(0.0, 1.0), ScaleRange::new(0.0, 2.0)).unwrap();
        let mut s = session(10).with_filter(scale);
        let sink = seen.clone();
        s.add_observer(move |ts: i64, data: &SensorData| {
            sink.lock().unwrap().push((ts, data.value, data.raw));
        });

        s.record(5, 3.0, CharProperties(CharProperties::NOTIFY));
        assert_eq!(*seen.lock().unwrap(), vec![(5, 6.0, 3.0)]);
    }

    #[test]
    fn test_record_payload_decodes() {
        let mut s = session(10);
        let value = s
            .record_payload(0, PayloadFormat::I16Le, &[0x18, 0xFC], CharProperties::default())
            .unwrap();
        assert_eq!(value, Some(-1000.0));
        assert!(s
            .record_payload(0, PayloadFormat::U32Le, &[1], CharProperties::default())
            .is_err());
        assert_eq!(s.stats().count, 1);
    }

    #[test]
    fn test_non_finite_filter_output_is_dropped() {
        struct Nan;
        impl ValueFilter for Nan {
            fn filter(&mut self, _: i64, _: f64) -> f64 {
                f64::NAN
            }
        }
        let mut s = session(10).with_filter(Nan);
        assert_eq!(s.record(0, 1.0, CharProperties::default()), None);
        assert!(s.sink().points.is_empty());
    }

    #[test]
    fn test_discard_skips_stats() {
        let mut s = session(4);
        for i in 0..3 {
            s.record(i, 1.0, CharProperties::default());
        }
        let sink = s.discard();
        assert!(sink.stats.is_empty());
        assert_eq!(sink.tier_len(1), 0);
    }
}
