//! Scheduled sync engine and HTTP API for sapwatch.
//!
//! This crate provides a service that:
//! - Pulls stem diameter and sap flow channels from the remote telemetry API
//!   on a fixed schedule, one device at a time
//! - Merges both channels into one reading per instant and device
//! - Supports manual syncs and historical backfills
//! - Exposes a REST API for windows, readings and sync control
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/remote/health` - Remote API reachability
//! - `GET /api/devices` - Configured devices with stored reading summaries
//! - `GET /api/devices/{code}/readings` - Stored readings with filters
//! - `GET /api/channels/{channel_id}/data` - One window of one channel
//! - `GET /api/aggregation/suggest` - Aggregation mode for a span
//! - `POST /api/sync` - Manual sync
//! - `POST /api/sync/backfill` - Backfill the last N days
//! - `GET /api/sync/status` - Engine state and last reports
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/sapwatch/service.toml`:
//!
//! ```toml
//! [remote]
//! base_url = "https://telemetry.example.com/api/data"
//! app_key = "..."
//!
//! [[devices]]
//! code = "D1"
//! name = "Tomato row 1"
//! setup_id = "12345"
//! diameter_channel = 101
//! sap_flow_channel = 102
//! active_from = "2023-01-01T00:00:00Z"
//! ```

pub mod api;
pub mod config;
pub mod scheduler;
pub mod state;
pub mod sync;

pub use config::{Config, ConfigError, DeviceConfig, ValidationError};
pub use scheduler::Scheduler;
pub use state::AppState;
pub use sync::{
    DeviceOutcome, DeviceReport, RunKind, SyncEngine, SyncError, SyncReport, SyncSettings,
    SyncStatus,
};
