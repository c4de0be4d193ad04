//! Local persistence for multi-resolution sensor recordings.
//!
//! This crate stores the tiered output of a recording session in SQLite and
//! serves it back for display.
//!
//! # Features
//!
//! - Scalar readings keyed by run, sensor, tier and timestamp
//! - Per-run statistics (stored as JSON)
//! - Range queries with pagination
//! - Zoom-tier selection for graphing a time window
//! - A [`RecordingSink`](sensorlink_types::RecordingSink) adapter for live recording
//!
//! # Example
//!
//! ```no_run
//! use sensorlink_store::{ReadingQuery, Store};
//!
//! let store = Store::open_default()?;
//!
//! let tier = store.ideal_tier("run-1", "temperature", 0, 60_000, 500)?;
//! let query = ReadingQuery::new()
//!     .run("run-1")
//!     .sensor("temperature")
//!     .tier(tier)
//!     .range(0, 60_000);
//! let points = store.query_readings(&query)?;
//! # Ok::<(), sensorlink_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod sink;
mod store;

pub use error::{Error, Result};
pub use models::StoredRun;
pub use queries::ReadingQuery;
pub use sink::StoreSink;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/sensorlink/data.db`
/// - macOS: `~/Library/Application Support/sensorlink/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\sensorlink\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("sensorlink")
        .join("data.db")
}
