//! Integration tests for the location document lifecycle: raw store
//! documents through normalization, check-in merges, store writes and stats

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use waitline::domain::normalize::{normalize_location_aggregate, NormalizeOptions};
use waitline::domain::types::{LocationId, RawTimestamp};
use waitline::io::store::{apply_write, DocumentWrite, LocationStore, MemoryStore};
use waitline::services::merge::{prepare_check_in_update, CheckInPayload, LAST_UPDATED_AT};
use waitline::services::stats::compute_location_stats;

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Merge one wait into `doc` the way the engine's transaction does
fn check_in(id: &LocationId, doc: Option<&Value>, wait: f64, now: DateTime<Utc>) -> Value {
    let update = prepare_check_in_update(id, doc.unwrap_or(&Value::Null), &CheckInPayload::new(wait, now)).unwrap();
    let write = DocumentWrite::merge(update.to_patch()).with_server_timestamp(LAST_UPDATED_AT);
    apply_write(doc, &write, now)
}

#[test]
fn test_scenario_a_through_the_store_write() {
    let id = LocationId::new("loc1");
    let existing = json!({ "totalCheckIns": 2, "totalWaitSeconds": 300, "avgWaitSeconds": 150, "visits": [] });

    let doc = check_in(&id, Some(&existing), 90.0, at("2024-01-03T15:30:00Z"));
    let aggregate = normalize_location_aggregate(&id, &doc, &NormalizeOptions::default());

    assert_eq!(aggregate.total_check_ins, 3);
    assert_eq!(aggregate.total_wait_seconds, 390.0);
    assert!((aggregate.avg_wait_seconds - 130.0).abs() < 1e-9);
    assert_eq!(aggregate.visits.len(), 1);
    assert_eq!(
        RawTimestamp::from_value(doc.get(LAST_UPDATED_AT)).to_datetime(),
        Some(at("2024-01-03T15:30:00Z"))
    );
}

#[test]
fn test_window_and_average_hold_over_many_check_ins() {
    let id = LocationId::new("busy");
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let mut doc: Option<Value> = None;
    let mut expected_total = 0.0;

    for i in 0..45u32 {
        let wait = 30.0 + f64::from(i) * 7.5;
        expected_total += wait;
        let now = start + chrono::Duration::minutes(i64::from(i) * 37);
        doc = Some(check_in(&id, doc.as_ref(), wait, now));
    }

    let doc = doc.unwrap();
    let aggregate = normalize_location_aggregate(&id, &doc, &NormalizeOptions::default());
    assert_eq!(aggregate.total_check_ins, 45);
    assert!((aggregate.total_wait_seconds - expected_total).abs() < 1e-6);
    assert!((aggregate.avg_wait_seconds - expected_total / 45.0).abs() < 1e-9);
    assert_eq!(aggregate.visits.len(), 20);
    // Most recent first
    assert_eq!(aggregate.visits[0].wait_seconds, 30.0 + 44.0 * 7.5);
    assert!(aggregate.visits.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

    let stats = compute_location_stats(&aggregate.visits);
    assert_eq!(stats.sample_count(), 20);
}

#[test]
fn test_renormalizing_a_written_document_is_stable() {
    let id = LocationId::new("stable");
    let doc = check_in(&id, None, 75.0, at("2024-05-05T09:15:00Z"));
    let opts = NormalizeOptions::default();

    let once = normalize_location_aggregate(&id, &doc, &opts);
    let twice = normalize_location_aggregate(&id, &Value::Object(once.to_document()), &opts);

    assert_eq!(once, twice);
}

#[test]
fn test_renormalizing_keeps_sub_second_timestamps() {
    let id = LocationId::new("precise");
    let now = Utc.timestamp_opt(1_714_900_500, 123_456_789).unwrap();
    let opts = NormalizeOptions::at(now);

    let doc = check_in(&id, None, 42.0, now);
    let once = normalize_location_aggregate(&id, &doc, &opts);
    let twice = normalize_location_aggregate(&id, &Value::Object(once.to_document()), &opts);
    assert_eq!(once, twice);
    assert_eq!(once.last_updated_at, Some(Utc.timestamp_opt(1_714_900_500, 123_000_000).unwrap()));

    let raw = json!({ "visits": [{ "timestamp": "2024-01-01T10:00:00.123456Z", "waitSeconds": 30 }] });
    let once = normalize_location_aggregate(&id, &raw, &opts);
    let twice = normalize_location_aggregate(&id, &Value::Object(once.to_document()), &opts);
    assert_eq!(once, twice);
}

#[test]
fn test_empty_history_has_no_stats() {
    let aggregate = normalize_location_aggregate(&LocationId::new("x"), &json!({}), &NormalizeOptions::default());
    let stats = compute_location_stats(&aggregate.visits);

    assert!(stats.hourly_averages.iter().flatten().all(Option::is_none));
    assert!(stats.weekly_averages.iter().all(Option::is_none));
}

#[tokio::test]
async fn test_memory_store_survives_persist_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locations.json");
    let id = LocationId::new("loc_saved");

    let store = MemoryStore::with_documents([(id.clone(), json!({ "name": "Saved", "totalCheckIns": 4 }))]);
    store.persist(&path).unwrap();

    let reloaded = MemoryStore::load(&path).unwrap();
    let doc = reloaded.get(&id).await.unwrap().unwrap();
    assert_eq!(doc["name"], "Saved");
    assert_eq!(reloaded.subscribe().borrow().len(), 1);

    let missing = MemoryStore::load(&dir.path().join("absent.json")).unwrap();
    assert!(missing.is_empty());
}
