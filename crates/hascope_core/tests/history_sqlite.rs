//! End-to-end history queries against real SQLite recorder fixtures,
//! covering both schema eras through the same logical query contract.

use chrono::{Duration, TimeZone, Utc};
use hascope_core::query::EntityFilter;
use hascope_core::schema::SchemaEra;
use hascope_core::store::{StateStore, DEFAULT_QUERY_TIMEOUT};
use hascope_core::timeframe::TimeWindow;
use rusqlite::{params, Connection};
use tempfile::TempDir;

fn base_epoch() -> f64 {
    Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap().timestamp() as f64
}

/// Build a normalized-meta recorder fixture:
/// states + states_meta + state_attributes joined by integer keys.
fn normalized_fixture(dir: &TempDir) -> String {
    let path = dir.path().join("home-assistant_v2.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE states (
            state_id INTEGER PRIMARY KEY AUTOINCREMENT,
            metadata_id INTEGER NOT NULL,
            state TEXT,
            last_changed_ts REAL,
            last_updated_ts REAL NOT NULL,
            attributes_id INTEGER
        );
        CREATE TABLE states_meta (
            metadata_id INTEGER PRIMARY KEY,
            entity_id TEXT NOT NULL
        );
        CREATE TABLE state_attributes (
            attributes_id INTEGER PRIMARY KEY,
            shared_attrs TEXT
        );
        INSERT INTO states_meta (metadata_id, entity_id) VALUES
            (1, 'sensor.temperature'),
            (2, 'sensor.humidity');
        INSERT INTO state_attributes (attributes_id, shared_attrs) VALUES
            (1, '{"unit_of_measurement": "°C", "friendly_name": "Temp"}'),
            (2, '{broken json');
        "#,
    )
    .unwrap();

    let t0 = base_epoch();
    // Newest row first in wall-clock terms; insertion order is mixed on
    // purpose so ordering must come from the query, not the fixture.
    let rows: [(i64, &str, Option<f64>, f64, Option<i64>); 5] = [
        (1, "20.0", Some(t0 - 3600.0), t0 - 3600.0, Some(1)),
        // Value unchanged between polls: last_changed_ts is NULL, only
        // last_updated_ts moved. Must survive via COALESCE.
        (1, "20.0", None, t0 - 1800.0, Some(1)),
        (1, "21.5", Some(t0 - 600.0), t0 - 600.0, Some(2)),
        (1, "22.0", Some(t0), t0, None),
        (2, "55", Some(t0 - 60.0), t0 - 60.0, None),
    ];
    for (meta, state, changed, updated, attrs) in rows {
        conn.execute(
            "INSERT INTO states (metadata_id, state, last_changed_ts, last_updated_ts, attributes_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![meta, state, changed, updated, attrs],
        )
        .unwrap();
    }

    format!("sqlite://{}", path.display())
}

/// Build a legacy-flat fixture: entity id and attributes inline, DATETIME
/// text columns.
fn legacy_fixture(dir: &TempDir) -> String {
    let path = dir.path().join("home-assistant_legacy.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE states (
            state_id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            state TEXT,
            last_changed TEXT,
            last_updated TEXT NOT NULL,
            attributes TEXT
        );
        "#,
    )
    .unwrap();

    let rows: [(&str, &str, Option<&str>, &str); 3] = [
        ("switch.pump", "off", Some("2026-01-18 10:00:00"), "2026-01-18 10:00:00"),
        ("switch.pump", "on", None, "2026-01-18 11:00:00"),
        ("switch.pump", "off", Some("2026-01-18 12:00:00"), "2026-01-18 12:00:00"),
    ];
    for (entity, state, changed, updated) in rows {
        conn.execute(
            "INSERT INTO states (entity_id, state, last_changed, last_updated, attributes)
             VALUES (?1, ?2, ?3, ?4, '{\"friendly_name\": \"Pump\"}')",
            params![entity, state, changed, updated],
        )
        .unwrap();
    }

    format!("sqlite://{}", path.display())
}

async fn connect(url: &str, era: SchemaEra) -> StateStore {
    StateStore::connect(url, era, 2, DEFAULT_QUERY_TIMEOUT).await.unwrap()
}

#[tokio::test]
async fn normalized_history_is_ordered_and_normalized() {
    let dir = TempDir::new().unwrap();
    let store = connect(&normalized_fixture(&dir), SchemaEra::NormalizedMeta).await;

    let filter = EntityFilter::Exact("sensor.temperature".into());
    let page = store.entity_states(Some(&filter), None, None, false).await.unwrap();

    // All four rows survive, including the NULL-last_changed one.
    assert_eq!(page.records.len(), 4);
    let states: Vec<&str> = page.records.iter().map(|r| r.state.as_str()).collect();
    assert_eq!(states, vec!["22.0", "21.5", "20.0", "20.0"]);

    // Effective-timestamp descending throughout.
    for pair in page.records.windows(2) {
        assert!(pair[0].effective_timestamp >= pair[1].effective_timestamp);
    }

    // COALESCE invariant on the unchanged-value row.
    let coalesced = &page.records[2];
    assert!(coalesced.raw_last_changed.is_none());
    assert_eq!(coalesced.effective_timestamp, coalesced.raw_last_updated);

    // Attributes: parsed map, degraded map, and absent row all present.
    assert_eq!(
        page.records[2].attributes.get("unit_of_measurement").and_then(|v| v.as_str()),
        Some("°C")
    );
    assert!(page.records[1].attributes.is_empty(), "broken payload degrades");
    assert!(page.records[0].attributes.is_empty(), "missing attrs row kept by LEFT JOIN");
}

#[tokio::test]
async fn window_filters_on_effective_timestamp() {
    let dir = TempDir::new().unwrap();
    let store = connect(&normalized_fixture(&dir), SchemaEra::NormalizedMeta).await;

    let t0 = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
    let window = TimeWindow::new(t0 - Duration::minutes(45), t0 - Duration::minutes(5));
    let filter = EntityFilter::Exact("sensor.temperature".into());
    let page = store.entity_states(Some(&filter), Some(&window), None, false).await.unwrap();

    // Only the NULL-changed row (t0-30min) and the 21.5 row (t0-10min)
    // fall inside; the NULL row is matched through COALESCE.
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].state, "21.5");
    assert_eq!(page.records[1].state, "20.0");
}

#[tokio::test]
async fn wildcard_limit_and_empty_results() {
    let dir = TempDir::new().unwrap();
    let store = connect(&normalized_fixture(&dir), SchemaEra::NormalizedMeta).await;

    let pattern = EntityFilter::from_input("sensor.*");
    let page = store.entity_states(Some(&pattern), None, Some(3), false).await.unwrap();
    assert_eq!(page.records.len(), 3);

    let missing = EntityFilter::Exact("light.nope".into());
    let page = store.entity_states(Some(&missing), None, None, false).await.unwrap();
    assert!(page.records.is_empty(), "zero rows is a valid outcome");
}

#[tokio::test]
async fn diagnostics_report_total_and_filtered_counts() {
    let dir = TempDir::new().unwrap();
    let store = connect(&normalized_fixture(&dir), SchemaEra::NormalizedMeta).await;

    let t0 = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
    let window = TimeWindow::new(t0 - Duration::minutes(15), t0);
    let filter = EntityFilter::Exact("sensor.temperature".into());
    let page = store.entity_states(Some(&filter), Some(&window), Some(1), true).await.unwrap();

    assert_eq!(page.records.len(), 1);
    let stats = page.stats.unwrap();
    assert_eq!(stats.total_records, 4, "all records for the entity, ignoring the window");
    assert_eq!(stats.filtered_count, 2, "in-window records before LIMIT");
}

#[tokio::test]
async fn legacy_era_serves_the_same_contract() {
    let dir = TempDir::new().unwrap();
    let store = connect(&legacy_fixture(&dir), SchemaEra::LegacyFlat).await;

    let filter = EntityFilter::Exact("switch.pump".into());
    let page = store.entity_states(Some(&filter), None, None, false).await.unwrap();

    assert_eq!(page.records.len(), 3);
    let states: Vec<&str> = page.records.iter().map(|r| r.state.as_str()).collect();
    assert_eq!(states, vec!["off", "on", "off"]);

    // The NULL-last_changed row resolves through last_updated.
    assert!(page.records[1].raw_last_changed.is_none());
    assert_eq!(
        page.records[1].effective_timestamp,
        Utc.with_ymd_and_hms(2026, 1, 18, 11, 0, 0).unwrap()
    );
    assert_eq!(
        page.records[0].attributes.get("friendly_name").and_then(|v| v.as_str()),
        Some("Pump")
    );
}

#[tokio::test]
async fn querying_the_wrong_era_is_a_schema_mismatch() {
    let dir = TempDir::new().unwrap();
    let url = legacy_fixture(&dir);
    // Legacy file opened with the normalized profile: the metadata join
    // has no table to hit.
    let store = connect(&url, SchemaEra::NormalizedMeta).await;

    let filter = EntityFilter::Exact("switch.pump".into());
    let err = store.entity_states(Some(&filter), None, None, false).await.unwrap_err();
    assert!(
        matches!(err, hascope_core::CoreError::SchemaMismatch(_)),
        "got {:?}",
        err
    );
}
