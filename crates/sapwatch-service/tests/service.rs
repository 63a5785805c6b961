//! End-to-end tests: config file, sync engine and HTTP API over one store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sapwatch_core::{DataPoint, MockTelemetryApi, RemoteDataClient};
use sapwatch_service::{AppState, Config, DeviceOutcome, RunKind, api};
use sapwatch_store::Store;
use tempfile::TempDir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;

const CONFIG: &str = r#"
[server]
bind = "127.0.0.1:8081"

[remote]
base_url = "https://telemetry.example.com/api/data"
app_key = "test"

[sync]
batch_size = 2
facility = "North house"

[[devices]]
code = "D1"
name = "Tomato row 1"
setup_id = "12345"
diameter_channel = 101
sap_flow_channel = 102
active_from = "2023-01-01T00:00:00Z"

[[devices]]
code = "D2"
name = "Tomato row 2"
setup_id = "12345"
diameter_channel = 201
sap_flow_channel = 202
active_from = "2023-01-01T00:00:00Z"
active_until = "2023-01-15T00:00:00Z"
"#;

struct Harness {
    _dir: TempDir,
    state: Arc<AppState>,
    api: Arc<MockTelemetryApi>,
}

fn harness(api: MockTelemetryApi) -> Harness {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("service.toml");
    std::fs::write(&config_path, CONFIG).unwrap();

    let mut config = Config::load_validated(&config_path).unwrap();
    config.storage.path = dir.path().join("data.db");

    let store = Store::open(&config.storage.path).unwrap();
    let api = Arc::new(api);
    let client = RemoteDataClient::with_options(api.clone(), config.fetch_options());
    let state = AppState::with_client(store, config, client);

    Harness {
        _dir: dir,
        state,
        api,
    }
}

async fn get_json(state: &Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = api::router()
        .with_state(Arc::clone(state))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_scheduled_run_then_read_back() {
    let now = datetime!(2023-03-03 0:00 UTC);
    let api = MockTelemetryApi::builder()
        .series(
            101,
            vec![
                DataPoint::new(datetime!(2023-03-02 23:00 UTC), 4.49),
                DataPoint::new(datetime!(2023-03-02 23:05 UTC), 4.65),
                DataPoint::new(datetime!(2023-03-02 23:10 UTC), 4.71),
            ],
        )
        .series(102, vec![DataPoint::new(datetime!(2023-03-02 23:00 UTC), 21.3)])
        .build();
    let h = harness(api);

    let report = h.state.sync.run_at(RunKind::Scheduled, now).await.unwrap();
    assert_eq!(report.device("D1").unwrap().outcome, DeviceOutcome::Synced);
    assert_eq!(report.device("D1").unwrap().readings_written, 3);
    // D2 ended more than 30 days before `now`
    assert_eq!(report.device("D2").unwrap().outcome, DeviceOutcome::SkippedStale);
    assert_eq!(h.api.request_count(), 2);

    let (status, json) = get_json(&h.state, "/api/devices/D1/readings").await;
    assert_eq!(status, StatusCode::OK);
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0]["diameter"], 4.49);
    assert_eq!(data[0]["sap_flow"], 21.3);
    assert_eq!(data[1]["diameter"], 4.65);
    assert!(data[1]["sap_flow"].is_null());

    let (_, devices) = get_json(&h.state, "/api/devices").await;
    assert_eq!(devices[0]["readings"]["last_at"], "2023-03-02T23:10:00Z");
    assert_eq!(devices[1]["readings"]["count"], 0);

    // The cursor is now 23:10; four minutes later the device is still fresh
    h.api.reset_requests().await;
    let again = h
        .state
        .sync
        .run_at(RunKind::Manual, datetime!(2023-03-02 23:14 UTC))
        .await
        .unwrap();
    assert_eq!(again.device("D1").unwrap().outcome, DeviceOutcome::SkippedFresh);
    assert_eq!(h.api.request_count(), 0);
}

#[tokio::test]
async fn test_late_sap_flow_merges_into_existing_readings() {
    let at = datetime!(2023-03-02 12:00 UTC);
    let api = MockTelemetryApi::builder()
        .series(101, vec![DataPoint::new(at, 4.5)])
        .build();
    let h = harness(api);
    let now = datetime!(2023-03-03 0:00 UTC);

    h.state.sync.run_at(RunKind::Backfill { days: 2 }, now).await.unwrap();

    // Sap flow for the same instant shows up later; diameter must survive
    h.api.set_series(101, Vec::new()).await;
    h.api.add_points(102, vec![DataPoint::new(at, 19.8)]).await;
    h.state.client.cache().clear().await;
    h.state.sync.run_at(RunKind::Backfill { days: 2 }, now).await.unwrap();

    let reading = h.state.store.lock().await.get_reading("D1", at).unwrap().unwrap();
    assert_eq!(reading.diameter, Some(4.5));
    assert_eq!(reading.sap_flow, Some(19.8));
}

#[tokio::test]
async fn test_manual_trigger_reports_through_status() {
    let recent = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap() - Duration::hours(2);
    let api = MockTelemetryApi::builder()
        .series(101, vec![DataPoint::new(recent, 4.0)])
        .build();
    let h = harness(api);

    let response = api::router()
        .with_state(Arc::clone(&h.state))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Fire-and-forget: wait for the background run to land
    while h.state.sync.status().await.last_manual.is_none() {
        tokio::task::yield_now().await;
    }

    let (_, status) = get_json(&h.state, "/api/sync/status").await;
    assert_eq!(status["running"], false);
    let devices = status["last_manual"]["devices"].as_array().unwrap();
    assert_eq!(devices[0]["outcome"], "synced");
    assert_eq!(devices[0]["readings_written"], 1);
    // Not stale-skipped, but the lookback starts after the device ended
    assert_eq!(devices[1]["outcome"], "skipped_inactive");
}
