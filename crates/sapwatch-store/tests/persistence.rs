//! File-backed store tests.

use sapwatch_store::{NewReading, ReadingQuery, SCHEMA_VERSION, Store};
use tempfile::TempDir;
use time::Duration;
use time::macros::datetime;

#[test]
fn test_readings_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("data.db");
    let at = datetime!(2023-03-02 23:00 UTC);

    {
        let mut store = Store::open(&path).unwrap();
        store
            .upsert_readings(&[NewReading::new("D1", "Row 1", at).diameter(Some(4.49))])
            .unwrap();
    }

    let mut store = Store::open(&path).unwrap();
    assert_eq!(store.latest_reading_at("D1").unwrap(), Some(at));

    store
        .upsert_readings(&[NewReading::new("D1", "Row 1", at).sap_flow(Some(21.3))])
        .unwrap();
    let readings = store.query_readings(&ReadingQuery::new()).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].diameter, Some(4.49));
    assert_eq!(readings[0].sap_flow, Some(21.3));
    assert!(SCHEMA_VERSION >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_store_behind_async_mutex() {
    let dir = TempDir::new().unwrap();
    let store = std::sync::Arc::new(tokio::sync::Mutex::new(
        Store::open(dir.path().join("data.db")).unwrap(),
    ));
    let start = datetime!(2023-01-01 0:00 UTC);

    let mut handles = Vec::new();
    for code in ["D1", "D2", "D3"] {
        let store = std::sync::Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let batch: Vec<NewReading> = (0..50)
                .map(|i| {
                    NewReading::new(code, code, start + Duration::minutes(5 * i))
                        .diameter(Some(i as f64))
                })
                .collect();
            store.lock().await.upsert_readings(&batch).unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let store = store.lock().await;
    assert_eq!(store.count_readings(None).unwrap(), 150);
    assert_eq!(store.count_readings(Some("D2")).unwrap(), 50);
}
