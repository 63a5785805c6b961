//! Core types for plant-physiology telemetry.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::ParseError;

/// Remote numeric identifier of one measurement channel.
pub type ChannelId = u32;

/// The physical quantity a channel measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ChannelKind {
    /// Stem diameter (mm).
    Diameter,
    /// Sap flow (g/h).
    SapFlow,
}

impl ChannelKind {
    /// Stable lowercase name, also used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Diameter => "diameter",
            ChannelKind::SapFlow => "sap_flow",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "diameter" | "stem_diameter" => Ok(ChannelKind::Diameter),
            "sap_flow" | "sapflow" | "sap-flow" => Ok(ChannelKind::SapFlow),
            other => Err(ParseError::UnknownChannelKind(other.to_string())),
        }
    }
}

/// A single measurement parsed from one remote response.
///
/// Raw points keep the full precision of the source value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataPoint {
    /// Instant of the measurement (UTC).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub at: OffsetDateTime,
    /// Measured value.
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point.
    #[must_use]
    pub fn new(at: OffsetDateTime, value: f64) -> Self {
        Self { at, value }
    }
}

/// How raw points are folded into coarser time buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AggregationMode {
    /// No bucketing; points are returned sorted ascending.
    #[default]
    Raw,
    /// One-hour buckets.
    Hourly,
    /// Six-hour buckets.
    SixHourly,
    /// One-day buckets.
    Daily,
    /// One-week buckets.
    Weekly,
}

impl AggregationMode {
    /// Width of one bucket, or `None` for raw mode.
    ///
    /// # Examples
    ///
    /// ```
    /// use sapwatch_types::AggregationMode;
    /// use time::Duration;
    ///
    /// assert_eq!(AggregationMode::Raw.bucket_width(), None);
    /// assert_eq!(AggregationMode::SixHourly.bucket_width(), Some(Duration::hours(6)));
    /// ```
    #[must_use]
    pub fn bucket_width(&self) -> Option<Duration> {
        match self {
            AggregationMode::Raw => None,
            AggregationMode::Hourly => Some(Duration::hours(1)),
            AggregationMode::SixHourly => Some(Duration::hours(6)),
            AggregationMode::Daily => Some(Duration::days(1)),
            AggregationMode::Weekly => Some(Duration::weeks(1)),
        }
    }

    /// Stable name used in cache keys and API responses.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMode::Raw => "raw",
            AggregationMode::Hourly => "hourly",
            AggregationMode::SixHourly => "six_hourly",
            AggregationMode::Daily => "daily",
            AggregationMode::Weekly => "weekly",
        }
    }

    /// Suggest a mode that keeps the point count readable for a span.
    ///
    /// - up to 7 days: raw
    /// - up to 30 days: hourly
    /// - up to 90 days: six-hourly
    /// - up to 365 days: daily
    /// - longer: weekly
    ///
    /// # Examples
    ///
    /// ```
    /// use sapwatch_types::AggregationMode;
    /// use time::Duration;
    ///
    /// assert_eq!(AggregationMode::suggest_for_span(Duration::days(3)), AggregationMode::Raw);
    /// assert_eq!(AggregationMode::suggest_for_span(Duration::days(60)), AggregationMode::SixHourly);
    /// assert_eq!(AggregationMode::suggest_for_span(Duration::days(500)), AggregationMode::Weekly);
    /// ```
    #[must_use]
    pub fn suggest_for_span(span: Duration) -> Self {
        if span <= Duration::days(7) {
            AggregationMode::Raw
        } else if span <= Duration::days(30) {
            AggregationMode::Hourly
        } else if span <= Duration::days(90) {
            AggregationMode::SixHourly
        } else if span <= Duration::days(365) {
            AggregationMode::Daily
        } else {
            AggregationMode::Weekly
        }
    }

    /// Suggest a mode for the span between two instants.
    #[must_use]
    pub fn suggest(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self::suggest_for_span((end - start).abs())
    }
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" | "none" => Ok(AggregationMode::Raw),
            "hourly" | "hour" | "1h" => Ok(AggregationMode::Hourly),
            "six_hourly" | "six_hour" | "6h" | "6hour" => Ok(AggregationMode::SixHourly),
            "daily" | "day" | "1d" => Ok(AggregationMode::Daily),
            "weekly" | "week" | "1w" => Ok(AggregationMode::Weekly),
            other => Err(ParseError::UnknownAggregation(other.to_string())),
        }
    }
}

/// A logical sensor: one diameter channel and one sap-flow channel
/// installed on the same plant over one active date range.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorDevice {
    /// Short logical code (e.g. `D1`). Readings are keyed by it.
    pub code: String,
    /// Display name stored alongside each reading.
    pub name: String,
    /// Remote setup identifier.
    pub setup_id: String,
    /// Remote channel id of the stem diameter stream.
    pub diameter_channel: ChannelId,
    /// Remote channel id of the sap flow stream.
    pub sap_flow_channel: ChannelId,
    /// First instant with meaningful data.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub active_from: OffsetDateTime,
    /// Last instant with meaningful data, if the installation has ended.
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "time::serde::rfc3339::option")
    )]
    pub active_until: Option<OffsetDateTime>,
}

impl SensorDevice {
    /// Remote channel id for a channel kind.
    #[must_use]
    pub fn channel(&self, kind: ChannelKind) -> ChannelId {
        match kind {
            ChannelKind::Diameter => self.diameter_channel,
            ChannelKind::SapFlow => self.sap_flow_channel,
        }
    }

    /// Whether the active range ended more than `stale_after` before `now`.
    ///
    /// Devices without an end date are never stale.
    #[must_use]
    pub fn is_stale(&self, now: OffsetDateTime, stale_after: Duration) -> bool {
        self.active_until
            .is_some_and(|until| until < now - stale_after)
    }

    /// Clamp a requested window start to the device's active range.
    #[must_use]
    pub fn clamp_start(&self, start: OffsetDateTime) -> OffsetDateTime {
        start.max(self.active_from)
    }
}

/// Time window requested from the remote API for one setup.
///
/// The window is half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FetchWindow {
    /// Remote setup identifier.
    pub setup_id: String,
    /// Inclusive start.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub start: OffsetDateTime,
    /// Exclusive end.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub end: OffsetDateTime,
}

impl FetchWindow {
    /// Create a new window.
    pub fn new(setup_id: impl Into<String>, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            setup_id: setup_id.into(),
            start,
            end,
        }
    }

    /// Length of the window. Negative if `end` precedes `start`.
    #[must_use]
    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the window contains no instants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Split into consecutive windows of at most `chunk` length.
    ///
    /// Chunks share their boundaries and together cover the whole window.
    ///
    /// # Examples
    ///
    /// ```
    /// use sapwatch_types::FetchWindow;
    /// use time::{Duration, macros::datetime};
    ///
    /// let start = datetime!(2023-01-01 0:00 UTC);
    /// let window = FetchWindow::new("42", start, start + Duration::days(400));
    /// let chunks = window.split(Duration::days(180));
    ///
    /// assert_eq!(chunks.len(), 3);
    /// assert_eq!(chunks[2].end, window.end);
    /// ```
    #[must_use]
    pub fn split(&self, chunk: Duration) -> Vec<FetchWindow> {
        if chunk <= Duration::ZERO || self.is_empty() {
            return vec![self.clone()];
        }

        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = (cursor + chunk).min(self.end);
            chunks.push(FetchWindow::new(self.setup_id.clone(), cursor, next));
            cursor = next;
        }
        chunks
    }
}

/// Metadata describing how a [`FetchResult`] was produced.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FetchMetadata {
    /// Remote channel id.
    pub channel_id: ChannelId,
    /// Remote setup id.
    pub setup_id: String,
    /// Requested window start.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub window_start: OffsetDateTime,
    /// Requested window end.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub window_end: OffsetDateTime,
    /// Aggregation applied to the points.
    pub aggregation: AggregationMode,
    /// Number of raw points before aggregation.
    pub raw_count: usize,
    /// Whether the result was served from the response cache.
    pub cached: bool,
    /// Whether the window was fetched in chunks.
    pub chunked: bool,
    /// Number of chunks that failed and were skipped.
    pub failed_chunks: usize,
    /// When the remote data was fetched.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub fetched_at: OffsetDateTime,
}

/// Result of fetching one window of one channel.
///
/// An empty `points` list means the remote genuinely had no data for the
/// window; failures are reported as errors instead.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FetchResult {
    /// Points sorted ascending by instant.
    pub points: Vec<DataPoint>,
    /// Number of points.
    pub count: usize,
    /// How the result was produced.
    pub metadata: FetchMetadata,
}

impl FetchResult {
    /// Build a result, deriving `count` from the points.
    #[must_use]
    pub fn new(points: Vec<DataPoint>, metadata: FetchMetadata) -> Self {
        Self {
            count: points.len(),
            points,
            metadata,
        }
    }

    /// Whether the window held no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
