//! Local persistence for merged sapwatch readings.
//!
//! One row per `(instant, device code)` holds the diameter and sap flow
//! values measured at that instant. Writes are merges: a value that is
//! absent from an incoming reading never erases a stored one, so channels
//! can arrive independently and windows can be re-applied safely.
//!
//! # Example
//!
//! ```
//! use sapwatch_store::{NewReading, ReadingQuery, Store};
//! use time::macros::datetime;
//!
//! let mut store = Store::open_in_memory()?;
//! let at = datetime!(2023-03-02 23:00 UTC);
//!
//! store.upsert_readings(&[NewReading::new("D1", "Row 1", at).diameter(Some(4.49))])?;
//! store.upsert_readings(&[NewReading::new("D1", "Row 1", at).sap_flow(Some(21.3))])?;
//!
//! let readings = store.query_readings(&ReadingQuery::new().sensor("D1"))?;
//! assert_eq!(readings.len(), 1);
//! assert_eq!(readings[0].diameter, Some(4.49));
//! assert_eq!(readings[0].sap_flow, Some(21.3));
//! # Ok::<(), sapwatch_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{Facility, NewReading, Plant, ReadingSummary, StoredReading, time_of_day};
pub use queries::ReadingQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/sapwatch/data.db`
/// - macOS: `~/Library/Application Support/sapwatch/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\sapwatch\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("sapwatch")
        .join("data.db")
}
