//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use sensorlink_store::{ReadingQuery, Store};
//!
//! let store = Store::open_in_memory()?;
//! store.add_scalar_reading("run-1", "temp", 0, 1_000, 21.5)?;
//!
//! let query = ReadingQuery::new()
//!     .run("run-1")
//!     .sensor("temp")
//!     .tier(0)
//!     .range(0, 5_000)
//!     .limit(50);
//!
//! let points = store.query_readings(&query)?;
//! assert_eq!(points.len(), 1);
//! # Ok::<(), sensorlink_store::Error>(())
//! ```

/// Fluent query builder for scalar readings.
///
/// Use this to construct queries for
/// [`Store::query_readings`](crate::Store::query_readings). All filters are
/// optional and can be chained in any order.
///
/// By default results are chronological (oldest first), which is the order
/// a graph consumes them in.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by run ID.
    pub run_id: Option<String>,
    /// Filter by sensor ID.
    pub sensor_id: Option<String>,
    /// Filter by zoom tier.
    pub tier: Option<u32>,
    /// Include only points at or after this timestamp (milliseconds).
    pub start: Option<i64>,
    /// Include only points at or before this timestamp (milliseconds).
    pub end: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp descending.
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a query matching every stored point, oldest first.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn run(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    #[must_use]
    pub fn sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }

    #[must_use]
    pub fn tier(mut self, tier: u32) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Filter to points at or after `start`.
    #[must_use]
    pub fn since(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Filter to points at or before `end`.
    #[must_use]
    pub fn until(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    /// Filter to the inclusive window `[start, end]`.
    #[must_use]
    pub fn range(self, start: i64, end: i64) -> Self {
        self.since(start).until(end)
    }

    /// Limit the maximum number of results returned.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    ///
    /// SQLite only accepts `OFFSET` after a `LIMIT`; an offset without a
    /// limit is applied with an unbounded limit.
    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref run_id) = self.run_id {
            conditions.push("run_id = ?");
            params.push(Box::new(run_id.clone()));
        }

        if let Some(ref sensor_id) = self.sensor_id {
            conditions.push("sensor_id = ?");
            params.push(Box::new(sensor_id.clone()));
        }

        if let Some(tier) = self.tier {
            conditions.push("tier = ?");
            params.push(Box::new(tier));
        }

        if let Some(start) = self.start {
            conditions.push("timestamp >= ?");
            params.push(Box::new(start));
        }

        if let Some(end) = self.end {
            conditions.push("timestamp <= ?");
            params.push(Box::new(end));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT run_id, sensor_id, tier, timestamp, value \
             FROM scalar_readings {} ORDER BY timestamp {}, id {}",
            where_clause, order, order
        );

        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_has_no_where() {
        let query = ReadingQuery::new();
        let (where_clause, params) = query.build_where();
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
        assert!(query.build_sql().ends_with("ORDER BY timestamp ASC, id ASC"));
    }

    #[test]
    fn test_filters_build_conditions() {
        let query = ReadingQuery::new()
            .run("r")
            .sensor("s")
            .tier(2)
            .range(10, 20);
        let (where_clause, params) = query.build_where();
        assert_eq!(
            where_clause,
            "WHERE run_id = ? AND sensor_id = ? AND tier = ? AND timestamp >= ? AND timestamp <= ?"
        );
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_pagination_sql() {
        let sql = ReadingQuery::new().limit(5).offset(10).newest_first().build_sql();
        assert!(sql.contains("ORDER BY timestamp DESC"));
        assert!(sql.ends_with("LIMIT 5 OFFSET 10"));

        let sql = ReadingQuery::new().offset(3).build_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET 3"));
    }
}
