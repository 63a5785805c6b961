//! Remote telemetry client for sapwatch.
//!
//! This crate talks to the third-party sensor API that serves stem diameter
//! and sap flow measurements as XML, one channel per request.
//!
//! # Features
//!
//! - **Truncation detection**: responses missing their root closing element
//!   are rejected before any value is extracted
//! - **Retries**: timeouts and truncated responses are retried with a linear
//!   backoff
//! - **Chunking**: long windows that keep failing are split and fetched
//!   piecewise
//! - **Aggregation**: hourly, six-hourly, daily and weekly bucket means
//! - **Response cache**: TTL cache keyed on channel, parameters and mode
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sapwatch_core::{HttpConfig, HttpTelemetryApi, RemoteDataClient};
//! use sapwatch_types::{AggregationMode, FetchWindow};
//! use time::{Duration, OffsetDateTime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = HttpTelemetryApi::new(HttpConfig::new("https://telemetry.example.com/api", "key"))?;
//!     let client = RemoteDataClient::new(Arc::new(api));
//!
//!     let end = OffsetDateTime::now_utc();
//!     let window = FetchWindow::new("12345", end - Duration::days(3), end);
//!     let result = client.fetch(101, &window, AggregationMode::Hourly).await?;
//!     println!("{} points", result.count);
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod cache;
pub mod client;
pub mod error;
pub mod http;
pub mod mock;
pub mod retry;
pub mod traits;
pub mod xml;

pub use aggregate::aggregate;
pub use cache::{CacheStats, DEFAULT_SWEEP_INTERVAL, ResponseCache, cache_key, ttl_for_window_end};
pub use client::{FetchOptions, RemoteDataClient, RemoteHealth};
pub use error::{Error, Result};
pub use http::{HttpConfig, HttpTelemetryApi};
pub use mock::{MockTelemetryApi, MockTelemetryApiBuilder};
pub use retry::{RetryConfig, with_retry};
pub use traits::{ChannelRequest, TelemetryApi, WindowParams};

// Re-export types for convenience
pub use sapwatch_types::{
    AggregationMode, ChannelId, ChannelKind, DataPoint, FetchMetadata, FetchResult, FetchWindow,
    SensorDevice,
};
