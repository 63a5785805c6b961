//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use sapwatch_store::{ReadingQuery, Store};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let week_ago = OffsetDateTime::now_utc() - Duration::days(7);
//!
//! let query = ReadingQuery::new().sensor("D1").since(week_ago).limit(500);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), sapwatch_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent query builder for [`Store::query_readings`](crate::Store::query_readings).
///
/// Results are ordered oldest first unless [`ReadingQuery::newest_first`]
/// is set.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by device code.
    pub sensor_code: Option<String>,
    /// Include readings at or after this instant.
    pub since: Option<OffsetDateTime>,
    /// Include readings at or before this instant.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp descending.
    pub newest_first: bool,
}

impl ReadingQuery {
    /// All readings, oldest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by device code.
    pub fn sensor(mut self, code: &str) -> Self {
        self.sensor_code = Some(code.to_string());
        self
    }

    /// Readings at or after this instant.
    pub fn since(mut self, at: OffsetDateTime) -> Self {
        self.since = Some(at);
        self
    }

    /// Readings at or before this instant.
    pub fn until(mut self, at: OffsetDateTime) -> Self {
        self.until = Some(at);
        self
    }

    /// Cap the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Newest readings first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref code) = self.sensor_code {
            conditions.push("sensor_code = ?");
            params.push(Box::new(code.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(until.unix_timestamp()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self, where_clause: &str) -> String {
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, timestamp, time_of_day, sap_flow, diameter, sensor_code, device_name, \
             plant_id, is_valid, is_interpolated, created_at, updated_at \
             FROM readings {} ORDER BY timestamp {}, sensor_code ASC",
            where_clause, order
        );

        // SQLite only accepts OFFSET after a LIMIT
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
