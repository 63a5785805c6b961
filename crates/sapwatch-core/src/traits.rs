//! Trait abstraction over the remote telemetry API.
//!
//! [`TelemetryApi`] lets the fetch pipeline run against the real HTTP
//! service ([`crate::http::HttpTelemetryApi`]) or an in-memory double
//! ([`crate::mock::MockTelemetryApi`]) in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use sapwatch_types::{ChannelId, FetchWindow};

use crate::error::Result;

/// One channel over one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Remote channel id.
    pub channel: ChannelId,
    /// Window to fetch.
    pub window: FetchWindow,
}

impl ChannelRequest {
    /// Create a new request.
    pub fn new(channel: ChannelId, window: FetchWindow) -> Self {
        Self { channel, window }
    }
}

/// Which parameter names carry the window bounds.
///
/// Deployments of the remote service disagree on the naming, so it is a
/// configuration choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowParams {
    /// `after` / `before`.
    #[default]
    AfterBefore,
    /// `from` / `till`.
    FromTill,
}

impl WindowParams {
    /// Parameter names for the start and end bounds.
    #[must_use]
    pub fn names(&self) -> (&'static str, &'static str) {
        match self {
            WindowParams::AfterBefore => ("after", "before"),
            WindowParams::FromTill => ("from", "till"),
        }
    }
}

/// Format an instant the way the remote API expects it.
pub fn format_instant(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Query parameters identifying a channel request, excluding credentials.
///
/// The same map feeds the HTTP query string and the response cache key.
pub fn query_params(request: &ChannelRequest, style: WindowParams) -> BTreeMap<String, String> {
    let (start_name, end_name) = style.names();
    let mut params = BTreeMap::new();
    params.insert("setup".to_string(), request.window.setup_id.clone());
    params.insert("channel".to_string(), request.channel.to_string());
    params.insert(start_name.to_string(), format_instant(request.window.start));
    params.insert(end_name.to_string(), format_instant(request.window.end));
    params
}

/// A source of raw telemetry responses.
///
/// Implementations return the response body untouched; parsing and
/// truncation detection happen in [`crate::xml`].
#[async_trait]
pub trait TelemetryApi: Send + Sync {
    /// Fetch the raw XML body for one channel and window.
    async fn fetch_xml(&self, request: &ChannelRequest) -> Result<String>;

    /// Check that the remote API is reachable.
    async fn ping(&self) -> Result<()>;

    /// Query parameters for a request, used for cache keys.
    fn query_params(&self, request: &ChannelRequest) -> BTreeMap<String, String> {
        query_params(request, WindowParams::default())
    }
}
