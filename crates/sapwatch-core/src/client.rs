//! Remote data client: fetch, parse, retry, chunk, aggregate, cache.
//!
//! [`RemoteDataClient::fetch`] answers one channel over one window:
//!
//! 1. A cache hit is returned as-is (marked `cached`).
//! 2. Otherwise the full window is requested. Timeouts and truncated
//!    responses are retried with a linear backoff.
//! 3. Windows longer than the chunk threshold switch to chunked fetching
//!    once a retry has failed. Each chunk gets its own retry budget; chunks
//!    that still fail are skipped and the result is the union of the rest.
//! 4. Points are sorted, aggregated once over the whole series, and cached
//!    with a TTL derived from the window's end.
//!
//! Results with skipped chunks are never cached, so a later call can fill
//! the gap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, warn};

use sapwatch_types::{AggregationMode, ChannelId, DataPoint, FetchMetadata, FetchResult, FetchWindow};

use crate::aggregate::aggregate;
use crate::cache::{ResponseCache, cache_key, ttl_for_window_end};
use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use crate::traits::{ChannelRequest, TelemetryApi};
use crate::xml::parse_response;

/// Tuning for retries and chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Retry budget for a full-window request.
    pub retry: RetryConfig,
    /// Windows longer than this may be fetched in chunks.
    pub chunk_threshold: time::Duration,
    /// Length of one chunk.
    pub chunk_size: time::Duration,
    /// Retry budget for each chunk.
    pub chunk_retry: RetryConfig,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            chunk_threshold: time::Duration::days(365),
            chunk_size: time::Duration::days(180),
            chunk_retry: RetryConfig::none(),
        }
    }
}

/// Outcome of a remote reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteHealth {
    /// Whether the remote API answered.
    pub reachable: bool,
    /// Round-trip time of the probe.
    pub latency_ms: u64,
    /// Failure description when unreachable.
    pub error: Option<String>,
    /// When the probe ran.
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

struct RawFetch {
    points: Vec<DataPoint>,
    chunked: bool,
    failed_chunks: usize,
}

/// Fetches channel windows from a [`TelemetryApi`] through a response cache.
///
/// Cloning is cheap; clones share the API and the cache.
#[derive(Clone)]
pub struct RemoteDataClient {
    api: Arc<dyn TelemetryApi>,
    cache: Arc<ResponseCache<FetchResult>>,
    options: FetchOptions,
}

impl std::fmt::Debug for RemoteDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDataClient")
            .field("options", &self.options)
            .field("cache", &self.cache)
            .finish()
    }
}

impl RemoteDataClient {
    /// Create a client with default options and a fresh cache.
    pub fn new(api: Arc<dyn TelemetryApi>) -> Self {
        Self::with_options(api, FetchOptions::default())
    }

    /// Create a client with custom options and a fresh cache.
    pub fn with_options(api: Arc<dyn TelemetryApi>, options: FetchOptions) -> Self {
        Self {
            api,
            cache: Arc::new(ResponseCache::new()),
            options,
        }
    }

    /// The response cache, e.g. to start its sweeper.
    pub fn cache(&self) -> &Arc<ResponseCache<FetchResult>> {
        &self.cache
    }

    /// Current options.
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch one channel over one window.
    ///
    /// An empty result means the remote had no data; failures are errors.
    pub async fn fetch(
        &self,
        channel: ChannelId,
        window: &FetchWindow,
        mode: AggregationMode,
    ) -> Result<FetchResult> {
        if window.is_empty() {
            return Err(Error::InvalidWindow(format!(
                "window start {} is not before end {}",
                window.start, window.end
            )));
        }

        let request = ChannelRequest::new(channel, window.clone());
        let key = cache_key(channel, self.api.query_params(&request), mode);

        if let Some(mut hit) = self.cache.get(&key).await {
            debug!("Cache hit for channel {} ({})", channel, mode);
            hit.metadata.cached = true;
            return Ok(hit);
        }
        debug!("Cache miss for channel {} ({})", channel, mode);

        let raw = self.fetch_raw(&request).await?;
        let points = aggregate(&raw.points, mode);
        let now = OffsetDateTime::now_utc();

        let result = FetchResult::new(
            points,
            FetchMetadata {
                channel_id: channel,
                setup_id: window.setup_id.clone(),
                window_start: window.start,
                window_end: window.end,
                aggregation: mode,
                raw_count: raw.points.len(),
                cached: false,
                chunked: raw.chunked,
                failed_chunks: raw.failed_chunks,
                fetched_at: now,
            },
        );

        if raw.failed_chunks == 0 {
            let ttl = ttl_for_window_end(window.end, now);
            self.cache.set(key, result.clone(), ttl).await;
        }

        debug!(
            "Fetched {} points ({} raw) for channel {}",
            result.count, result.metadata.raw_count, channel
        );
        Ok(result)
    }

    /// Probe the remote API.
    pub async fn health_check(&self) -> RemoteHealth {
        let started = Instant::now();
        let outcome = self.api.ping().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        RemoteHealth {
            reachable: outcome.is_ok(),
            latency_ms,
            error: outcome.err().map(|e| e.to_string()),
            checked_at: OffsetDateTime::now_utc(),
        }
    }

    async fn fetch_once(&self, request: &ChannelRequest) -> Result<Vec<DataPoint>> {
        let body = self.api.fetch_xml(request).await?;
        parse_response(&body, request.channel)
    }

    async fn fetch_raw(&self, request: &ChannelRequest) -> Result<RawFetch> {
        let retry = &self.options.retry;
        let long_window = request.window.span() > self.options.chunk_threshold;
        let mut attempt = 1;

        loop {
            let err = match self.fetch_once(request).await {
                Ok(points) => {
                    return Ok(RawFetch {
                        points,
                        chunked: false,
                        failed_chunks: 0,
                    });
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if long_window && attempt >= 2 {
                warn!(
                    "Channel {} still failing after {} attempts ({}); switching to chunked fetch",
                    request.channel, attempt, err
                );
                return self.fetch_chunked(request).await;
            }

            if attempt > retry.max_retries {
                return Err(err);
            }

            let delay: Duration = retry.delay_for_attempt(attempt);
            warn!(
                "Fetch of channel {} failed (attempt {}/{}): {}; retrying in {:?}",
                request.channel,
                attempt,
                retry.total_attempts(),
                err,
                delay
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch_chunked(&self, request: &ChannelRequest) -> Result<RawFetch> {
        let chunks = request.window.split(self.options.chunk_size);
        let total = chunks.len();
        let mut points = Vec::new();
        let mut failed_chunks = 0;
        let mut last_error = None;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let chunk_request = ChannelRequest::new(request.channel, chunk);
            let name = format!(
                "channel {} chunk {}/{}",
                request.channel,
                index + 1,
                total
            );

            match with_retry(&self.options.chunk_retry, &name, || {
                self.fetch_once(&chunk_request)
            })
            .await
            {
                Ok(chunk_points) => points.extend(chunk_points),
                Err(e) => {
                    warn!(
                        "Skipping {} ({} to {}): {}",
                        name, chunk_request.window.start, chunk_request.window.end, e
                    );
                    failed_chunks += 1;
                    last_error = Some(e);
                }
            }
        }

        if failed_chunks == total
            && let Some(e) = last_error
        {
            return Err(e);
        }

        points.sort_by(|a, b| a.at.cmp(&b.at));
        points.dedup_by(|a, b| a.at == b.at);

        Ok(RawFetch {
            points,
            chunked: true,
            failed_chunks,
        })
    }
}
