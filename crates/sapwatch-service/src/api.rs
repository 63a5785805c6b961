//! REST API endpoints for the sapwatch service.
//!
//! # Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. A remote
//! failure is a 502 that echoes the remote status when there is one. A
//! window the remote has no data for is not an error: it returns 200 with
//! `"status": "no_data"`.
//!
//! # Lock Acquisition
//!
//! When both are needed, `config` is read before `store` is locked.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use sapwatch_core::{
    AggregationMode, ChannelId, FetchMetadata, FetchWindow, DataPoint, RemoteHealth,
};
use sapwatch_store::{ReadingQuery, ReadingSummary, StoredReading};

use crate::config::DeviceConfig;
use crate::state::AppState;
use crate::sync::SyncStatus;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/remote/health", get(remote_health))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{code}/readings", get(get_readings))
        .route("/api/channels/{channel_id}/data", get(get_channel_data))
        .route("/api/aggregation/suggest", get(suggest_aggregation))
        .route("/api/sync", post(trigger_sync))
        .route("/api/sync/backfill", post(trigger_backfill))
        .route("/api/sync/status", get(sync_status))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Probe the remote API. Always 200; reachability is in the body.
async fn remote_health(State(state): State<Arc<AppState>>) -> Json<RemoteHealth> {
    Json(state.client.health_check().await)
}

/// A configured device with what is stored for it.
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    #[serde(flatten)]
    pub device: DeviceConfig,
    pub readings: ReadingSummary,
}

/// List configured devices.
///
/// # Errors
///
/// Returns [`AppError::Store`] if a summary query fails.
async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeviceResponse>>, AppError> {
    let devices = state.config.read().await.devices.clone();
    let store = state.store.lock().await;

    let mut response = Vec::with_capacity(devices.len());
    for device in devices {
        let readings = store.reading_summary(&device.code)?;
        response.push(DeviceResponse { device, readings });
    }
    Ok(Json(response))
}

/// Query parameters for readings. Instants are RFC 3339.
#[derive(Debug, Deserialize, Default)]
pub struct ReadingsQuery {
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub count: usize,
    pub offset: u32,
    pub limit: Option<u32>,
    pub has_more: bool,
}

/// Stored readings for a configured device, oldest first.
///
/// # Errors
///
/// - [`AppError::NotFound`] if no device has this code
/// - [`AppError::BadRequest`] for an unparseable instant or `since > until`
async fn get_readings(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<PaginatedResponse<StoredReading>>, AppError> {
    let known = state
        .config
        .read()
        .await
        .devices
        .iter()
        .any(|d| d.code == code);
    if !known {
        return Err(AppError::NotFound(format!("Device not found: {}", code)));
    }

    let since = parse_optional_instant("since", params.since.as_deref())?;
    let until = parse_optional_instant("until", params.until.as_deref())?;
    if let (Some(since), Some(until)) = (since, until)
        && since > until
    {
        return Err(AppError::BadRequest(format!(
            "Invalid time range: 'since' ({}) must not be after 'until' ({})",
            since, until
        )));
    }

    let mut query = ReadingQuery::new().sensor(&code);
    if let Some(since) = since {
        query = query.since(since);
    }
    if let Some(until) = until {
        query = query.until(until);
    }
    // One extra row tells whether there are more
    if let Some(limit) = params.limit {
        query = query.limit(limit.saturating_add(1));
    }
    if let Some(offset) = params.offset {
        query = query.offset(offset);
    }

    let mut readings = state.store.lock().await.query_readings(&query)?;

    let has_more = params.limit.is_some_and(|l| readings.len() > l as usize);
    if has_more {
        readings.pop();
    }

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: readings.len(),
            offset: params.offset.unwrap_or(0),
            limit: params.limit,
            has_more,
        },
        data: readings,
    }))
}

/// Query parameters for a channel window.
#[derive(Debug, Deserialize)]
pub struct ChannelDataQuery {
    pub setup_id: String,
    pub start: String,
    pub end: String,
    /// Defaults to the suggestion for the window span.
    pub aggregation: Option<String>,
}

/// One fetched window.
#[derive(Debug, Serialize)]
pub struct ChannelDataResponse {
    /// `ok`, or `no_data` when the remote had nothing in the window.
    pub status: &'static str,
    pub count: usize,
    pub points: Vec<DataPoint>,
    pub metadata: FetchMetadata,
}

/// Fetch one window of one channel through the cache.
///
/// # Errors
///
/// - [`AppError::BadRequest`] for bad instants, an empty window or an
///   unknown aggregation mode
/// - [`AppError::Remote`] when the remote API fails
async fn get_channel_data(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<ChannelId>,
    Query(params): Query<ChannelDataQuery>,
) -> Result<Json<ChannelDataResponse>, AppError> {
    let start = parse_instant("start", &params.start)?;
    let end = parse_instant("end", &params.end)?;
    if start >= end {
        return Err(AppError::BadRequest(
            "'start' must be before 'end'".to_string(),
        ));
    }
    if params.setup_id.trim().is_empty() {
        return Err(AppError::BadRequest("'setup_id' is required".to_string()));
    }

    let mode = match params.aggregation.as_deref() {
        Some(s) => s
            .parse::<AggregationMode>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
        None => AggregationMode::suggest(start, end),
    };

    let window = FetchWindow::new(params.setup_id, start, end);
    let result = state.client.fetch(channel_id, &window, mode).await?;

    Ok(Json(ChannelDataResponse {
        status: if result.is_empty() { "no_data" } else { "ok" },
        count: result.count,
        points: result.points,
        metadata: result.metadata,
    }))
}

/// Query parameters for an aggregation suggestion.
#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    pub start: String,
    pub end: String,
}

/// Suggested aggregation mode for a span.
#[derive(Debug, Serialize)]
pub struct SuggestResponse {
    pub aggregation: AggregationMode,
    pub span_days: f64,
}

async fn suggest_aggregation(
    Query(params): Query<SuggestQuery>,
) -> Result<Json<SuggestResponse>, AppError> {
    let start = parse_instant("start", &params.start)?;
    let end = parse_instant("end", &params.end)?;
    if start > end {
        return Err(AppError::BadRequest(
            "'start' must not be after 'end'".to_string(),
        ));
    }

    Ok(Json(SuggestResponse {
        aggregation: AggregationMode::suggest(start, end),
        span_days: (end - start).as_seconds_f64() / 86_400.0,
    }))
}

/// Acknowledgement for a fire-and-forget trigger.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// `accepted`, or `already_running` when the request will be dropped.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
}

/// Start a manual sync in the background.
async fn trigger_sync(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = trigger_status(&state);
    drop(state.sync.trigger_manual());
    (StatusCode::ACCEPTED, Json(TriggerResponse { status, days: None }))
}

/// Backfill request body.
#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    pub days: u32,
}

/// Start a backfill in the background. `days` is capped to the configured
/// maximum.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if `days` is 0.
async fn trigger_backfill(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BackfillRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    if request.days == 0 {
        return Err(AppError::BadRequest(
            "'days' must be at least 1".to_string(),
        ));
    }

    let days = request.days.min(state.sync.settings().max_backfill_days);
    let status = trigger_status(&state);
    drop(state.sync.trigger_backfill(days));

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            status,
            days: Some(days),
        }),
    ))
}

fn trigger_status(state: &AppState) -> &'static str {
    if state.sync.is_running() {
        "already_running"
    } else {
        "accepted"
    }
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    Json(state.sync.status().await)
}

fn parse_instant(field: &str, value: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| {
        AppError::BadRequest(format!(
            "Invalid '{}' instant '{}': {} (expected RFC 3339)",
            field, value, e
        ))
    })
}

fn parse_optional_instant(
    field: &str,
    value: Option<&str>,
) -> Result<Option<OffsetDateTime>, AppError> {
    value.map(|v| parse_instant(field, v)).transpose()
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Remote { status: Option<u16>, message: String },
    Store(sapwatch_store::Error),
    Internal(String),
}

impl From<sapwatch_store::Error> for AppError {
    fn from(e: sapwatch_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<sapwatch_core::Error> for AppError {
    fn from(e: sapwatch_core::Error) -> Self {
        match e {
            sapwatch_core::Error::InvalidWindow(msg) => AppError::BadRequest(msg),
            sapwatch_core::Error::InvalidConfig(msg) => AppError::Internal(msg),
            other => AppError::Remote {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            AppError::Remote { status, message } => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({ "error": message, "status": status }),
            ),
            AppError::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": msg }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use sapwatch_core::{MockTelemetryApi, RemoteDataClient};
    use sapwatch_store::{NewReading, Store};
    use time::macros::datetime;
    use tower::ServiceExt;

    use crate::config::Config;

    fn device() -> DeviceConfig {
        DeviceConfig {
            code: "D1".to_string(),
            name: "Tomato row 1".to_string(),
            setup_id: "12345".to_string(),
            diameter_channel: 101,
            sap_flow_channel: 102,
            active_from: datetime!(2023-01-01 0:00 UTC),
            active_until: None,
        }
    }

    fn create_test_state(api: Arc<MockTelemetryApi>) -> Arc<AppState> {
        let config = Config {
            devices: vec![device()],
            ..Default::default()
        };
        let client = RemoteDataClient::new(api);
        AppState::with_client(Store::open_in_memory().unwrap(), config, client)
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router()
            .with_state(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        split(response).await
    }

    async fn post_json(
        state: Arc<AppState>,
        uri: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let response = router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        split(response).await
    }

    async fn split(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, json) = get(create_test_state(Arc::new(MockTelemetryApi::new())), "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_remote_health_reports_unreachable() {
        let api = Arc::new(MockTelemetryApi::new());
        api.set_ping_fails(true);

        let (status, json) = get(create_test_state(api), "/api/remote/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["reachable"], false);
        assert!(json["error"].as_str().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_list_devices_with_summary() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));
        state
            .store
            .lock()
            .await
            .upsert_readings(&[NewReading::new("D1", "Tomato row 1", datetime!(2023-03-02 23:00 UTC))
                .diameter(Some(4.49))])
            .unwrap();

        let (status, json) = get(state, "/api/devices").await;
        assert_eq!(status, StatusCode::OK);

        let devices = json.as_array().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0]["code"], "D1");
        assert_eq!(devices[0]["diameter_channel"], 101);
        assert_eq!(devices[0]["readings"]["count"], 1);
        assert_eq!(devices[0]["readings"]["last_at"], "2023-03-02T23:00:00Z");
    }

    #[tokio::test]
    async fn test_readings_unknown_device() {
        let (status, json) = get(create_test_state(Arc::new(MockTelemetryApi::new())), "/api/devices/nope/readings").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_readings_pagination_and_range() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));
        let start = datetime!(2023-03-02 0:00 UTC);
        let batch: Vec<NewReading> = (0..5)
            .map(|i| {
                NewReading::new("D1", "Tomato row 1", start + time::Duration::hours(i))
                    .diameter(Some(4.0 + i as f64))
            })
            .collect();
        state.store.lock().await.upsert_readings(&batch).unwrap();

        let (status, json) = get(
            Arc::clone(&state),
            "/api/devices/D1/readings?since=2023-03-02T01:00:00Z&limit=2",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pagination"]["count"], 2);
        assert_eq!(json["pagination"]["has_more"], true);
        assert_eq!(json["data"][0]["diameter"], 5.0);

        let (status, _) = get(
            Arc::clone(&state),
            "/api/devices/D1/readings?since=2023-03-03T00:00:00Z&until=2023-03-02T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = get(state, "/api/devices/D1/readings?since=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("RFC 3339"));
    }

    #[tokio::test]
    async fn test_channel_data_aggregates_and_caches() {
        let start = datetime!(2023-03-02 0:00 UTC);
        let api = Arc::new(
            MockTelemetryApi::builder()
                .series(
                    101,
                    (0..12)
                        .map(|i| DataPoint::new(start + time::Duration::minutes(5 * i), i as f64))
                        .collect(),
                )
                .build(),
        );
        let state = create_test_state(api.clone());
        let uri = "/api/channels/101/data?setup_id=12345&start=2023-03-02T00:00:00Z&end=2023-03-02T01:00:00Z&aggregation=hourly";

        let (status, json) = get(Arc::clone(&state), uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["count"], 1);
        assert_eq!(json["points"][0]["value"], 5.5);
        assert_eq!(json["points"][0]["at"], "2023-03-02T00:30:00Z");
        assert_eq!(json["metadata"]["raw_count"], 12);

        let (_, json) = get(state, uri).await;
        assert_eq!(json["metadata"]["cached"], true);
        assert_eq!(api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_data_no_data_is_not_an_error() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));
        let (status, json) = get(
            state,
            "/api/channels/101/data?setup_id=12345&start=2023-03-02T00:00:00Z&end=2023-03-03T00:00:00Z",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "no_data");
        assert_eq!(json["count"], 0);
        assert_eq!(json["metadata"]["aggregation"], "raw");
    }

    #[tokio::test]
    async fn test_channel_data_remote_error_is_bad_gateway() {
        let api = Arc::new(MockTelemetryApi::new());
        api.set_channel_error(101, 503, "maintenance").await;

        let (status, json) = get(
            create_test_state(api),
            "/api/channels/101/data?setup_id=12345&start=2023-03-02T00:00:00Z&end=2023-03-03T00:00:00Z",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["status"], 503);
        assert!(json["error"].as_str().unwrap().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_channel_data_bad_input() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));

        let (status, _) = get(
            Arc::clone(&state),
            "/api/channels/101/data?setup_id=12345&start=2023-03-03T00:00:00Z&end=2023-03-02T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = get(
            state,
            "/api/channels/101/data?setup_id=12345&start=2023-03-02T00:00:00Z&end=2023-03-03T00:00:00Z&aggregation=monthly",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("monthly"));
    }

    #[tokio::test]
    async fn test_suggest_aggregation() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));
        let cases = [
            ("2023-03-01T00:00:00Z", "2023-03-08T00:00:00Z", "raw"),
            ("2023-03-01T00:00:00Z", "2023-03-20T00:00:00Z", "hourly"),
            ("2023-01-01T00:00:00Z", "2023-03-01T00:00:00Z", "six_hourly"),
            ("2023-01-01T00:00:00Z", "2023-12-01T00:00:00Z", "daily"),
            ("2021-01-01T00:00:00Z", "2023-01-01T00:00:00Z", "weekly"),
        ];

        for (start, end, expected) in cases {
            let uri = format!("/api/aggregation/suggest?start={}&end={}", start, end);
            let (status, json) = get(Arc::clone(&state), &uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["aggregation"], expected, "{start}..{end}");
        }
    }

    #[tokio::test]
    async fn test_trigger_sync_accepted() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));
        let (status, json) = post_json(Arc::clone(&state), "/api/sync", "").await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "accepted");
    }

    #[tokio::test]
    async fn test_trigger_backfill_validation() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));

        let (status, _) = post_json(Arc::clone(&state), "/api/sync/backfill", r#"{"days":0}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) =
            post_json(Arc::clone(&state), "/api/sync/backfill", r#"{"days":1000}"#).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["days"], 365);
    }

    #[tokio::test]
    async fn test_sync_status_after_run() {
        let state = create_test_state(Arc::new(MockTelemetryApi::new()));
        state.sync.run(crate::sync::RunKind::Manual).await.unwrap();

        let (status, json) = get(state, "/api/sync/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["running"], false);
        assert_eq!(json["last_manual"]["kind"]["kind"], "manual");
        assert_eq!(json["last_manual"]["devices"][0]["code"], "D1");
        assert!(json["last_scheduled"].is_null());
    }
}
