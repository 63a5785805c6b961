//! Database schema and migrations.
//!
//! Timestamps are stored as unix seconds (UTC). Readings are unique per
//! `(timestamp, sensor_code)`; that constraint backs the merge upsert.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = schema_version(conn)?;

    if version > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    if version == 0 {
        create_schema_v1(conn)?;
    }
    if version < SCHEMA_VERSION {
        migrate(conn, version.max(1))?;
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS facilities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        -- One plant per device code
        CREATE TABLE IF NOT EXISTS plants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            facility_id INTEGER NOT NULL REFERENCES facilities(id),
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            time_of_day TEXT NOT NULL,
            sap_flow REAL,
            diameter REAL,
            sensor_code TEXT NOT NULL CHECK (length(sensor_code) > 0),
            device_name TEXT NOT NULL,
            plant_id INTEGER REFERENCES plants(id),
            is_valid INTEGER NOT NULL DEFAULT 1,
            is_interpolated INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(timestamp, sensor_code)
        );
        "#,
    )?;
    set_schema_version(conn, 1)?;
    Ok(())
}

/// v2: index for per-sensor range scans and cursor lookups.
fn migrate_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_readings_sensor_time
            ON readings(sensor_code, timestamp);",
    )?;
    Ok(())
}

fn migrate(conn: &Connection, from: i32) -> Result<()> {
    if from < 2 {
        migrate_to_v2(conn)?;
    }

    info!("Migrated database schema from v{} to v{}", from, SCHEMA_VERSION);
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}
