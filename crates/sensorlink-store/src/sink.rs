//! [`RecordingSink`] adapter over [`Store`].

use tracing::warn;

use sensorlink_types::{RecordingSink, RunStats};

use crate::error::Error;
use crate::store::Store;

/// Errors kept for [`StoreSink::take_errors`]; later ones are only counted.
const MAX_KEPT_ERRORS: usize = 16;

/// Writes a live recording into a [`Store`].
///
/// The recorder never looks at sink results, so failed writes are logged,
/// counted and kept for the owner to collect with
/// [`take_errors`](Self::take_errors).
#[derive(Debug)]
pub struct StoreSink {
    store: Store,
    error_count: u64,
    errors: Vec<Error>,
}

impl StoreSink {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            error_count: 0,
            errors: Vec::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Number of failed writes since creation.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Drain the kept errors.
    pub fn take_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }

    pub fn into_inner(self) -> Store {
        self.store
    }

    fn record_error(&mut self, what: &str, run_id: &str, sensor_id: &str, error: Error) {
        warn!("Failed to store {} for {}/{}: {}", what, run_id, sensor_id, error);
        self.error_count += 1;
        if self.errors.len() < MAX_KEPT_ERRORS {
            self.errors.push(error);
        }
    }
}

impl RecordingSink for StoreSink {
    fn add_scalar_reading(
        &mut self,
        run_id: &str,
        sensor_id: &str,
        tier: u32,
        timestamp_millis: i64,
        value: f64,
    ) {
        if let Err(e) = self
            .store
            .add_scalar_reading(run_id, sensor_id, tier, timestamp_millis, value)
        {
            self.record_error("reading", run_id, sensor_id, e);
        }
    }

    fn set_stats(&mut self, run_id: &str, sensor_id: &str, stats: &RunStats) {
        if let Err(e) = self.store.set_stats(run_id, sensor_id, stats) {
            self.record_error("stats", run_id, sensor_id, e);
        }
    }
}
