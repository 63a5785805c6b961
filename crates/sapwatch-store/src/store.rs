//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use sapwatch_types::SensorDevice;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{Facility, NewReading, Plant, ReadingSummary, StoredReading, time_of_day};
use crate::queries::ReadingQuery;
use crate::schema;

/// Insert-or-merge. Value columns only take non-null incoming values.
const UPSERT_READING: &str = "
    INSERT INTO readings (timestamp, time_of_day, sap_flow, diameter, sensor_code,
        device_name, plant_id, is_valid, is_interpolated, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
    ON CONFLICT(timestamp, sensor_code) DO UPDATE SET
        sap_flow = COALESCE(excluded.sap_flow, readings.sap_flow),
        diameter = COALESCE(excluded.diameter, readings.diameter),
        device_name = excluded.device_name,
        plant_id = COALESCE(excluded.plant_id, readings.plant_id),
        is_valid = excluded.is_valid,
        is_interpolated = excluded.is_interpolated,
        updated_at = excluded.updated_at";

/// SQLite-based store for merged readings.
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
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

fn unix_seconds(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let ts: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn to_datetime(ts: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| Error::InvalidTimestamp(format!("{}: {}", ts, e)))
}

fn stored_reading(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    Ok(StoredReading {
        id: row.get(0)?,
        at: unix_seconds(row, 1)?,
        time_of_day: row.get(2)?,
        sap_flow: row.get(3)?,
        diameter: row.get(4)?,
        sensor_code: row.get(5)?,
        device_name: row.get(6)?,
        plant_id: row.get(7)?,
        is_valid: row.get(8)?,
        is_interpolated: row.get(9)?,
        created_at: unix_seconds(row, 10)?,
        updated_at: unix_seconds(row, 11)?,
    })
}

// Facility and plant lookups
impl Store {
    /// Get or create a facility by name.
    pub fn ensure_facility(&self, name: &str) -> Result<Facility> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.conn.execute(
            "INSERT INTO facilities (name, created_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            rusqlite::params![name, now],
        )?;

        let facility = self.conn.query_row(
            "SELECT id, name FROM facilities WHERE name = ?",
            [name],
            |row| {
                Ok(Facility {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;
        Ok(facility)
    }

    /// Get or create the plant a device is installed on, refreshing its name.
    pub fn ensure_plant(&self, facility_id: i64, device: &SensorDevice) -> Result<Plant> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.conn.execute(
            "INSERT INTO plants (facility_id, code, name, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(code) DO UPDATE SET name = excluded.name",
            rusqlite::params![facility_id, device.code, device.name, now],
        )?;

        let plant = self.conn.query_row(
            "SELECT id, facility_id, code, name FROM plants WHERE code = ?",
            [&device.code],
            |row| {
                Ok(Plant {
                    id: row.get(0)?,
                    facility_id: row.get(1)?,
                    code: row.get(2)?,
                    name: row.get(3)?,
                })
            },
        )?;
        Ok(plant)
    }
}

// Reading operations
impl Store {
    /// Merge a batch of readings in one transaction.
    ///
    /// Either every reading is written or none is. Returns the number of
    /// readings applied.
    pub fn upsert_readings(&mut self, readings: &[NewReading]) -> Result<usize> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare_cached(UPSERT_READING)?;
            for reading in readings {
                stmt.execute(rusqlite::params![
                    reading.at.unix_timestamp(),
                    time_of_day(reading.at),
                    reading.sap_flow,
                    reading.diameter,
                    reading.sensor_code,
                    reading.device_name,
                    reading.plant_id,
                    reading.is_valid,
                    reading.is_interpolated,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Upserted {} readings", readings.len());
        Ok(readings.len())
    }

    /// Instant of the newest stored reading for a device.
    pub fn latest_reading_at(&self, sensor_code: &str) -> Result<Option<OffsetDateTime>> {
        let ts: Option<i64> = self.conn.query_row(
            "SELECT MAX(timestamp) FROM readings WHERE sensor_code = ?",
            [sensor_code],
            |row| row.get(0),
        )?;
        ts.map(to_datetime).transpose()
    }

    /// The reading stored for a device at an exact instant.
    pub fn get_reading(&self, sensor_code: &str, at: OffsetDateTime) -> Result<Option<StoredReading>> {
        let reading = self
            .conn
            .query_row(
                "SELECT id, timestamp, time_of_day, sap_flow, diameter, sensor_code, device_name,
                 plant_id, is_valid, is_interpolated, created_at, updated_at
                 FROM readings WHERE sensor_code = ?1 AND timestamp = ?2",
                rusqlite::params![sensor_code, at.unix_timestamp()],
                stored_reading,
            )
            .optional()?;
        Ok(reading)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let (where_clause, params) = query.build_where();
        let sql = query.build_sql(&where_clause);

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), stored_reading)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Count readings, optionally for one device.
    pub fn count_readings(&self, sensor_code: Option<&str>) -> Result<u64> {
        let count: i64 = match sensor_code {
            Some(code) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE sensor_code = ?",
                [code],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Count and time range of a device's readings.
    pub fn reading_summary(&self, sensor_code: &str) -> Result<ReadingSummary> {
        let (count, first, last): (i64, Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM readings WHERE sensor_code = ?",
            [sensor_code],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(ReadingSummary {
            count: count as u64,
            first_at: first.map(to_datetime).transpose()?,
            last_at: last.map(to_datetime).transpose()?,
        })
    }
}
