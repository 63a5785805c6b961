//! In-memory telemetry API for testing.
//!
//! [`MockTelemetryApi`] implements [`TelemetryApi`] over per-channel point
//! series and renders them as the remote service would. Failures are
//! injected the way the real service produces them: truncated bodies come
//! back as `Ok` with the root closing element missing, so the whole parsing
//! path is exercised.
//!
//! # Features
//!
//! - **Truncation injection**: fail the next N requests, or every request
//!   whose window exceeds a span
//! - **Timeouts and remote errors**: transient and permanent failures
//! - **Request log**: inspect what the client actually asked for

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use sapwatch_types::{ChannelId, DataPoint};

use crate::error::{Error, Result};
use crate::traits::{ChannelRequest, TelemetryApi, format_instant};

/// Render points as a complete response body.
///
/// # Example
///
/// ```
/// use sapwatch_core::mock::render_xml;
/// use sapwatch_types::DataPoint;
/// use time::macros::datetime;
///
/// let body = render_xml(7, &[DataPoint::new(datetime!(2023-01-01 0:00 UTC), 1.5)]);
/// assert!(body.ends_with("</response>\n"));
/// ```
pub fn render_xml(channel: ChannelId, points: &[DataPoint]) -> String {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<response>\n");
    let _ = writeln!(body, "  <node id=\"{}\">", channel);
    for point in points {
        let _ = writeln!(
            body,
            "    <v DateTime=\"{}\" Value=\"{}\"/>",
            format_instant(point.at),
            point.value
        );
    }
    body.push_str("  </node>\n</response>\n");
    body
}

/// Cut a body in half, the way the remote service drops a stream under load.
fn truncate_body(body: &str) -> String {
    let mut cut = body.len() / 2;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body[..cut].to_string()
}

/// A mock remote telemetry API.
///
/// # Example
///
/// ```
/// use sapwatch_core::{MockTelemetryApi, TelemetryApi};
///
/// #[tokio::main]
/// async fn main() {
///     let api = MockTelemetryApi::new();
///     api.ping().await.unwrap();
///     assert_eq!(api.request_count(), 0);
/// }
/// ```
pub struct MockTelemetryApi {
    series: RwLock<HashMap<ChannelId, Vec<DataPoint>>>,
    requests: RwLock<Vec<ChannelRequest>>,
    request_count: AtomicU32,
    /// Requests left that return a truncated body.
    remaining_truncations: AtomicU32,
    /// Requests left that time out.
    remaining_timeouts: AtomicU32,
    /// Windows longer than this always come back truncated.
    truncate_spans_over: RwLock<Option<time::Duration>>,
    /// Channels answered with a permanent remote error.
    channel_errors: RwLock<HashMap<ChannelId, (u16, String)>>,
    /// Simulated latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    ping_fails: AtomicBool,
}

impl std::fmt::Debug for MockTelemetryApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTelemetryApi")
            .field("request_count", &self.request_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockTelemetryApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTelemetryApi {
    /// Create an API with no data and no failures.
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            requests: RwLock::new(Vec::new()),
            request_count: AtomicU32::new(0),
            remaining_truncations: AtomicU32::new(0),
            remaining_timeouts: AtomicU32::new(0),
            truncate_spans_over: RwLock::new(None),
            channel_errors: RwLock::new(HashMap::new()),
            latency_ms: AtomicU64::new(0),
            ping_fails: AtomicBool::new(false),
        }
    }

    /// Create a builder.
    pub fn builder() -> MockTelemetryApiBuilder {
        MockTelemetryApiBuilder::new()
    }

    // --- Test control methods ---

    /// Replace the series served for a channel.
    pub async fn set_series(&self, channel: ChannelId, mut points: Vec<DataPoint>) {
        points.sort_by(|a, b| a.at.cmp(&b.at));
        self.series.write().await.insert(channel, points);
    }

    /// Append points to a channel's series.
    pub async fn add_points(&self, channel: ChannelId, points: Vec<DataPoint>) {
        let mut series = self.series.write().await;
        let entry = series.entry(channel).or_default();
        entry.extend(points);
        entry.sort_by(|a, b| a.at.cmp(&b.at));
    }

    /// Return a truncated body for the next `count` requests.
    pub fn set_truncated_responses(&self, count: u32) {
        self.remaining_truncations.store(count, Ordering::Relaxed);
    }

    /// Time out the next `count` requests.
    pub fn set_timeouts(&self, count: u32) {
        self.remaining_timeouts.store(count, Ordering::Relaxed);
    }

    /// Truncate every response whose window is longer than `span`.
    pub async fn set_truncate_spans_over(&self, span: Option<time::Duration>) {
        *self.truncate_spans_over.write().await = span;
    }

    /// Answer every request for `channel` with a remote error.
    pub async fn set_channel_error(&self, channel: ChannelId, status: u16, message: &str) {
        self.channel_errors
            .write()
            .await
            .insert(channel, (status, message.to_string()));
    }

    /// Stop failing requests for `channel`.
    pub async fn clear_channel_error(&self, channel: ChannelId) {
        self.channel_errors.write().await.remove(&channel);
    }

    /// Set simulated latency for every request.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make `ping` fail.
    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::Relaxed);
    }

    /// Number of `fetch_xml` calls so far.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Reset the request counter and log.
    pub async fn reset_requests(&self) {
        self.request_count.store(0, Ordering::Relaxed);
        self.requests.write().await.clear();
    }

    /// Every request received, in order.
    pub async fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.read().await.clone()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn render(&self, request: &ChannelRequest) -> String {
        let series = self.series.read().await;
        let points: Vec<DataPoint> = series
            .get(&request.channel)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.at >= request.window.start && p.at < request.window.end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        render_xml(request.channel, &points)
    }
}

#[async_trait]
impl TelemetryApi for MockTelemetryApi {
    async fn fetch_xml(&self, request: &ChannelRequest) -> Result<String> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.requests.write().await.push(request.clone());

        if let Some((status, message)) = self.channel_errors.read().await.get(&request.channel) {
            return Err(Error::Remote {
                status: *status,
                message: message.clone(),
            });
        }

        if Self::take_one(&self.remaining_timeouts) {
            return Err(Error::Timeout {
                operation: format!("fetch channel {}", request.channel),
                duration: Duration::from_secs(60),
            });
        }

        let body = self.render(request).await;

        if Self::take_one(&self.remaining_truncations) {
            return Ok(truncate_body(&body));
        }

        let too_long = self
            .truncate_spans_over
            .read()
            .await
            .is_some_and(|limit| request.window.span() > limit);
        if too_long {
            return Ok(truncate_body(&body));
        }

        Ok(body)
    }

    async fn ping(&self) -> Result<()> {
        if self.ping_fails.load(Ordering::Relaxed) {
            return Err(Error::Transport("mock remote unreachable".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`MockTelemetryApi`].
#[derive(Debug, Default)]
pub struct MockTelemetryApiBuilder {
    series: HashMap<ChannelId, Vec<DataPoint>>,
    truncations: u32,
    timeouts: u32,
    truncate_spans_over: Option<time::Duration>,
    latency: Duration,
}

impl MockTelemetryApiBuilder {
    /// Create a builder with no data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `points` for `channel`.
    #[must_use]
    pub fn series(mut self, channel: ChannelId, points: Vec<DataPoint>) -> Self {
        self.series.insert(channel, points);
        self
    }

    /// Truncate the first `count` responses.
    #[must_use]
    pub fn truncated_responses(mut self, count: u32) -> Self {
        self.truncations = count;
        self
    }

    /// Time out the first `count` requests.
    #[must_use]
    pub fn timeouts(mut self, count: u32) -> Self {
        self.timeouts = count;
        self
    }

    /// Truncate every response for windows longer than `span`.
    #[must_use]
    pub fn truncate_spans_over(mut self, span: time::Duration) -> Self {
        self.truncate_spans_over = Some(span);
        self
    }

    /// Delay every request.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build the mock.
    pub fn build(self) -> MockTelemetryApi {
        let mut series = self.series;
        for points in series.values_mut() {
            points.sort_by(|a, b| a.at.cmp(&b.at));
        }

        let api = MockTelemetryApi::new();
        api.remaining_truncations
            .store(self.truncations, Ordering::Relaxed);
        api.remaining_timeouts.store(self.timeouts, Ordering::Relaxed);
        api.set_latency(self.latency);

        MockTelemetryApi {
            series: RwLock::new(series),
            truncate_spans_over: RwLock::new(self.truncate_spans_over),
            ..api
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_response;
    use sapwatch_types::FetchWindow;
    use time::macros::datetime;

    fn points() -> Vec<DataPoint> {
        vec![
            DataPoint::new(datetime!(2023-03-02 23:00 UTC), 4.49),
            DataPoint::new(datetime!(2023-03-02 23:05 UTC), 4.65),
            DataPoint::new(datetime!(2023-03-03 0:00 UTC), 4.70),
        ]
    }

    fn request(channel: ChannelId) -> ChannelRequest {
        ChannelRequest::new(
            channel,
            FetchWindow::new(
                "1",
                datetime!(2023-03-02 0:00 UTC),
                datetime!(2023-03-03 0:00 UTC),
            ),
        )
    }

    #[tokio::test]
    async fn test_serves_half_open_window() {
        let api = MockTelemetryApi::builder().series(101, points()).build();
        let body = api.fetch_xml(&request(101)).await.unwrap();
        let parsed = parse_response(&body, 101).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(api.request_count(), 1);
        assert_eq!(api.requests().await[0].channel, 101);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_empty() {
        let api = MockTelemetryApi::new();
        let body = api.fetch_xml(&request(5)).await.unwrap();
        assert!(parse_response(&body, 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_then_complete() {
        let api = MockTelemetryApi::builder()
            .series(101, points())
            .truncated_responses(1)
            .build();

        let first = api.fetch_xml(&request(101)).await.unwrap();
        assert!(matches!(
            parse_response(&first, 101),
            Err(Error::Truncated { .. })
        ));

        let second = api.fetch_xml(&request(101)).await.unwrap();
        assert_eq!(parse_response(&second, 101).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_timeouts() {
        let api = MockTelemetryApi::builder().timeouts(1).build();
        assert!(matches!(
            api.fetch_xml(&request(1)).await,
            Err(Error::Timeout { .. })
        ));
        assert!(api.fetch_xml(&request(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_error() {
        let api = MockTelemetryApi::new();
        api.set_channel_error(9, 403, "forbidden").await;
        assert!(matches!(
            api.fetch_xml(&request(9)).await,
            Err(Error::Remote { status: 403, .. })
        ));
        assert!(api.fetch_xml(&request(8)).await.is_ok());

        api.clear_channel_error(9).await;
        assert!(api.fetch_xml(&request(9)).await.is_ok());
    }

    #[tokio::test]
    async fn test_truncate_long_spans() {
        let api = MockTelemetryApi::builder()
            .truncate_spans_over(time::Duration::hours(12))
            .build();
        let body = api.fetch_xml(&request(1)).await.unwrap();
        assert!(matches!(
            parse_response(&body, 1),
            Err(Error::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn test_ping_failure() {
        let api = MockTelemetryApi::new();
        assert!(api.ping().await.is_ok());
        api.set_ping_fails(true);
        assert!(matches!(api.ping().await, Err(Error::Transport(_))));
    }
}
