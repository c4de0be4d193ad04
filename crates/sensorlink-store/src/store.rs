//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use sensorlink_types::{RunStats, StoredPoint};

use crate::error::{Error, Result};
use crate::models::StoredRun;
use crate::queries::ReadingQuery;
use crate::schema;

/// SQLite-based store for recorded runs.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Readings ===

    /// Insert one point of one tier.
    pub fn add_scalar_reading(
        &self,
        run_id: &str,
        sensor_id: &str,
        tier: u32,
        timestamp_millis: i64,
        value: f64,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO scalar_readings (run_id, sensor_id, tier, timestamp, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(rusqlite::params![run_id, sensor_id, tier, timestamp_millis, value])?;
        Ok(())
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredPoint>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let points = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(StoredPoint {
                    run_id: row.get(0)?,
                    sensor_id: row.get(1)?,
                    tier: row.get(2)?,
                    timestamp_millis: row.get(3)?,
                    value: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(points)
    }

    /// Count readings of one tier, optionally within `[start, end]`.
    pub fn count_readings(
        &self,
        run_id: &str,
        sensor_id: &str,
        tier: u32,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scalar_readings
             WHERE run_id = ?1 AND sensor_id = ?2 AND tier = ?3
               AND (?4 IS NULL OR timestamp >= ?4)
               AND (?5 IS NULL OR timestamp <= ?5)",
            rusqlite::params![run_id, sensor_id, tier, start, end],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Highest tier holding any point of the run/sensor pair.
    pub fn max_tier(&self, run_id: &str, sensor_id: &str) -> Result<Option<u32>> {
        let tier: Option<u32> = self.conn.query_row(
            "SELECT MAX(tier) FROM scalar_readings WHERE run_id = ?1 AND sensor_id = ?2",
            [run_id, sensor_id],
            |row| row.get(0),
        )?;
        Ok(tier)
    }

    /// Pick the tier to display `[start, end]` with at most about
    /// `ideal_points` points.
    ///
    /// Starts from the tier-0 count of the window and divides it by the
    /// run's `zoom_level_between_tiers` until it fits, never going past the
    /// highest tier actually stored. Runs without statistics (still
    /// recording, or discarded) are shown at tier 0.
    pub fn ideal_tier(
        &self,
        run_id: &str,
        sensor_id: &str,
        start: i64,
        end: i64,
        ideal_points: u64,
    ) -> Result<u32> {
        let Some(stats) = self.get_stats(run_id, sensor_id)? else {
            debug!("No stats for {}/{}, using tier 0", run_id, sensor_id);
            return Ok(0);
        };
        let max_tier = self.max_tier(run_id, sensor_id)?.unwrap_or(0);
        let zoom_level = u64::from(stats.zoom_level_between_tiers);
        if zoom_level < 2 {
            return Ok(0);
        }

        let ideal_points = ideal_points.max(1);
        let mut points = self.count_readings(run_id, sensor_id, 0, Some(start), Some(end))?;
        let mut tier = 0;
        while points > ideal_points && tier < max_tier {
            points = points.div_ceil(zoom_level);
            tier += 1;
        }

        debug!(
            "Ideal tier for {}/{} over [{}, {}]: {}",
            run_id, sensor_id, start, end, tier
        );
        Ok(tier)
    }

    // === Run statistics ===

    /// Store the statistics of a run, replacing any previous value.
    pub fn set_stats(&self, run_id: &str, sensor_id: &str, stats: &RunStats) -> Result<()> {
        let json = serde_json::to_string(stats)?;
        self.conn.execute(
            "INSERT INTO run_stats (run_id, sensor_id, stats_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id, sensor_id) DO UPDATE SET
                stats_json = ?3,
                updated_at = ?4",
            rusqlite::params![
                run_id,
                sensor_id,
                json,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;
        Ok(())
    }

    /// Get the statistics of a run.
    pub fn get_stats(&self, run_id: &str, sensor_id: &str) -> Result<Option<RunStats>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT stats_json FROM run_stats WHERE run_id = ?1 AND sensor_id = ?2",
                [run_id, sensor_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|s| serde_json::from_str(&s).map_err(Error::from))
            .transpose()
    }

    /// List every run with stored statistics, most recently updated first.
    pub fn list_runs(&self) -> Result<Vec<StoredRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, sensor_id, stats_json, updated_at
             FROM run_stats ORDER BY updated_at DESC, run_id, sensor_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(run_id, sensor_id, json, updated_at)| {
                Ok(StoredRun {
                    run_id,
                    sensor_id,
                    stats: serde_json::from_str(&json)?,
                    updated_at: OffsetDateTime::from_unix_timestamp(updated_at)
                        .map_err(|_| Error::InvalidTimestamp(updated_at))?,
                })
            })
            .collect()
    }

    /// Delete every reading and statistic of a run (all sensors).
    ///
    /// Returns the number of readings removed.
    pub fn delete_run(&self, run_id: &str) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute("DELETE FROM scalar_readings WHERE run_id = ?", [run_id])?;
        tx.execute("DELETE FROM run_stats WHERE run_id = ?", [run_id])?;
        tx.commit()?;

        info!("Deleted run {} ({} readings)", run_id, deleted);
        Ok(deleted)
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(zoom_tiers: u32, zoom_level: u32) -> RunStats {
        RunStats {
            minimum: 0.0,
            maximum: 1.0,
            average: 0.5,
            count: 2,
            total_duration_millis: 10,
            zoom_tiers,
            zoom_level_between_tiers: zoom_level,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_runs().unwrap().is_empty());
        assert_eq!(store.max_tier("r", "s").unwrap(), None);
    }

    #[test]
    fn test_insert_and_query_reading() {
        let store = Store::open_in_memory().unwrap();
        store.add_scalar_reading("run", "temp", 0, 2_000, 21.0).unwrap();
        store.add_scalar_reading("run", "temp", 0, 1_000, 20.0).unwrap();
        store.add_scalar_reading("run", "temp", 1, 1_000, 20.0).unwrap();
        store.add_scalar_reading("other", "temp", 0, 1_000, 5.0).unwrap();

        let query = ReadingQuery::new().run("run").sensor("temp").tier(0);
        let points = store.query_readings(&query).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp_millis, 1_000);
        assert_eq!(points[1].value, 21.0);

        let newest = store
            .query_readings(&query.clone().newest_first().limit(1))
            .unwrap();
        assert_eq!(newest[0].timestamp_millis, 2_000);
    }

    #[test]
    fn test_query_range_is_inclusive() {
        let store = Store::open_in_memory().unwrap();
        for ts in [0, 10, 20, 30] {
            store.add_scalar_reading("run", "s", 0, ts, ts as f64).unwrap();
        }
        let points = store
            .query_readings(&ReadingQuery::new().run("run").range(10, 20))
            .unwrap();
        let stamps: Vec<i64> = points.iter().map(|p| p.timestamp_millis).collect();
        assert_eq!(stamps, vec![10, 20]);
        assert_eq!(store.count_readings("run", "s", 0, Some(10), None).unwrap(), 3);
    }

    #[test]
    fn test_stats_round_trip_and_replace() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_stats("run", "s").unwrap(), None);

        store.set_stats("run", "s", &stats(1, 50)).unwrap();
        store.set_stats("run", "s", &stats(2, 50)).unwrap();
        assert_eq!(store.get_stats("run", "s").unwrap(), Some(stats(2, 50)));

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run");
        assert_eq!(runs[0].stats.zoom_tiers, 2);
    }

    #[test]
    fn test_delete_run() {
        let store = Store::open_in_memory().unwrap();
        store.add_scalar_reading("run", "a", 0, 0, 1.0).unwrap();
        store.add_scalar_reading("run", "b", 1, 0, 1.0).unwrap();
        store.add_scalar_reading("keep", "a", 0, 0, 1.0).unwrap();
        store.set_stats("run", "a", &stats(1, 5)).unwrap();

        assert_eq!(store.delete_run("run").unwrap(), 2);
        assert_eq!(store.get_stats("run", "a").unwrap(), None);
        assert_eq!(store.query_readings(&ReadingQuery::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_ideal_tier() {
        let store = Store::open_in_memory().unwrap();
        // 1000 raw points, zoom level 5, tiers up to 2.
        for ts in 0..1000 {
            store.add_scalar_reading("run", "s", 0, ts, 0.0).unwrap();
        }
        store.add_scalar_reading("run", "s", 2, 0, 0.0).unwrap();
        store.set_stats("run", "s", &stats(2, 5)).unwrap();

        assert_eq!(store.ideal_tier("run", "s", 0, 999, 1000).unwrap(), 0);
        assert_eq!(store.ideal_tier("run", "s", 0, 999, 200).unwrap(), 1);
        assert_eq!(store.ideal_tier("run", "s", 0, 999, 40).unwrap(), 2);
        // Clamped to the highest stored tier.
        assert_eq!(store.ideal_tier("run", "s", 0, 999, 1).unwrap(), 2);
        // A narrow window needs no decimation.
        assert_eq!(store.ideal_tier("run", "s", 0, 99, 100).unwrap(), 0);
        // Unknown runs fall back to raw data.
        assert_eq!(store.ideal_tier("missing", "s", 0, 999, 1).unwrap(), 0);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        {
            let store = Store::open(&path).unwrap();
            store.add_scalar_reading("run", "s", 0, 1, 2.0).unwrap();
        }
        assert!(path.exists());

        let store = Store::open(&path).unwrap();
        assert_eq!(store.count_readings("run", "s", 0, None, None).unwrap(), 1);
    }
}
