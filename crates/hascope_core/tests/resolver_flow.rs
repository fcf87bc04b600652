//! Resolver orchestration: correlation scoring, degradation flow and
//! per-entity batch isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hascope_core::api::LiveApi;
use hascope_core::correlate::{correlate_event, CorrelationPolicy};
use hascope_core::error::{CoreError, CoreResult};
use hascope_core::events::{ErrorEvent, EventSource};
use hascope_core::query::BuiltQuery;
use hascope_core::record::RawStateRow;
use hascope_core::registry::EntityRegistry;
use hascope_core::resolver::{DegradationStatus, HybridResolver};
use hascope_core::schema::{Engine, SchemaEra, SchemaProfile};
use hascope_core::store::{QueryExecutor, StateStore, DEFAULT_QUERY_TIMEOUT};
use hascope_core::HascopeConfig;
use rusqlite::{params, Connection};
use tempfile::TempDir;

fn test_config() -> HascopeConfig {
    toml::from_str(
        r#"
        [database]
        url = "sqlite:///nonexistent/recorder.db"

        [api]
        url = "http://127.0.0.1:1"
        access_token = "test-token"
        timeout_secs = 1
        "#,
    )
    .unwrap()
}

fn test_api() -> LiveApi {
    LiveApi::new("http://127.0.0.1:1", "test-token", StdDuration::from_secs(1)).unwrap()
}

/// Recorder fixture with transitions for sensor.x at T-2min and T-20min.
fn correlation_fixture(dir: &TempDir, error_time: chrono::DateTime<Utc>) -> String {
    let path = dir.path().join("recorder.db");
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
        INSERT INTO states_meta (metadata_id, entity_id) VALUES (1, 'sensor.x');
        "#,
    )
    .unwrap();

    let t = error_time.timestamp() as f64;
    // Chronologically: baseline, transition at T-20min, baseline restated
    // inside the window, transition at T-2min.
    let rows: [(&str, f64); 4] = [
        ("ok", t - 3600.0),
        ("degraded", t - 1200.0),
        ("degraded", t - 540.0),
        ("failed", t - 120.0),
    ];
    for (state, ts) in rows {
        conn.execute(
            "INSERT INTO states (metadata_id, state, last_changed_ts, last_updated_ts)
             VALUES (1, ?1, ?2, ?2)",
            params![state, ts],
        )
        .unwrap();
    }

    format!("sqlite://{}", path.display())
}

#[tokio::test]
async fn correlation_scores_nearby_transition_only() {
    let dir = TempDir::new().unwrap();
    let error_time = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
    let url = correlation_fixture(&dir, error_time);
    let store = StateStore::connect(&url, SchemaEra::NormalizedMeta, 2, DEFAULT_QUERY_TIMEOUT)
        .await
        .unwrap();

    let mut event = ErrorEvent::new(
        error_time,
        "Error while updating sensor.x: deadline exceeded".into(),
        EventSource::Log,
    );
    event.referenced_entity_ids.insert("sensor.x".into());

    let policy = CorrelationPolicy::default();
    let result = correlate_event(&store, event, &policy).await.unwrap();

    // Only the T-2min transition is in the 10-minute window; the T-20min
    // one is excluded by construction. The T-9min row restates the same
    // state and is not a transition.
    assert_eq!(result.matches.len(), 1);
    let best = &result.matches[0];
    assert_eq!(best.record.state, "failed");
    assert_eq!(best.previous_state, "degraded");
    assert!((best.score - 0.8).abs() < 0.01, "score was {}", best.score);
    assert!((result.strength - 0.8).abs() < 0.01);
}

#[tokio::test]
async fn event_without_references_correlates_to_nothing() {
    let dir = TempDir::new().unwrap();
    let error_time = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
    let url = correlation_fixture(&dir, error_time);
    let store = StateStore::connect(&url, SchemaEra::NormalizedMeta, 2, DEFAULT_QUERY_TIMEOUT)
        .await
        .unwrap();

    let event = ErrorEvent::new(error_time, "something broke".into(), EventSource::Log);
    let result = correlate_event(&store, event, &CorrelationPolicy::default()).await.unwrap();
    assert!(result.matches.is_empty());
    assert_eq!(result.strength, 0.0);
}

#[tokio::test]
async fn store_failure_degrades_and_correlation_stays_calm() {
    // Store never connected: the resolver starts degraded.
    let resolver = HybridResolver::with_parts(
        test_config(),
        None,
        Some(CoreError::Connection("recorder unreachable".into())),
        test_api(),
        EntityRegistry::default(),
        false,
    );
    assert_eq!(resolver.status(), DegradationStatus::DegradedFallback);

    let mut event = ErrorEvent::new(Utc::now(), "sensor.x failed".into(), EventSource::Log);
    event.referenced_entity_ids.insert("sensor.x".into());

    let resolved = resolver.correlate(vec![event]).await;
    assert_eq!(resolved.status, DegradationStatus::DegradedFallback);
    let results = resolved.value.unwrap();
    assert!(results.is_empty());
    assert!(matches!(
        resolved.degradation_reason,
        Some(CoreError::CorrelationUnavailable(_))
    ));
}

/// Executor that fails for one specific entity and answers for the rest,
/// to prove per-entity isolation in batches.
struct MixedExecutor;

#[async_trait]
impl QueryExecutor for MixedExecutor {
    async fn fetch(&self, query: &BuiltQuery) -> CoreResult<Vec<RawStateRow>> {
        let poisoned = query
            .params
            .iter()
            .any(|p| matches!(p, hascope_core::query::SqlValue::Text(s) if s == "sensor.bad"));
        if poisoned {
            return Err(CoreError::QueryTimeout(5));
        }
        Ok(vec![RawStateRow {
            entity_id: "sensor.good".into(),
            state: "21.0".into(),
            last_updated_ts: Some(1_768_737_600.0),
            ..Default::default()
        }])
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn batch_isolates_per_entity_failures() {
    let store = StateStore::with_executor(
        Arc::new(MixedExecutor),
        SchemaProfile::select(Engine::Sqlite, SchemaEra::NormalizedMeta),
        DEFAULT_QUERY_TIMEOUT,
    );
    let resolver = Arc::new(HybridResolver::with_parts(
        test_config(),
        Some(store),
        None,
        test_api(),
        EntityRegistry::default(),
        false,
    ));

    let entities = vec!["sensor.good".to_string(), "sensor.bad".to_string()];
    let resolved = Arc::clone(&resolver)
        .batch_history(entities, None, Some(10))
        .await;

    assert_eq!(resolved.status, DegradationStatus::PrimaryAvailable);
    assert_eq!(resolved.value.len(), 2);

    let good = &resolved.value[0];
    assert_eq!(good.entity_id, "sensor.good");
    assert_eq!(good.outcome.as_ref().unwrap().records.len(), 1);

    // The failing entity timed out in the store and then hit the closed
    // live port; its sibling is untouched either way.
    let bad = &resolved.value[1];
    assert_eq!(bad.entity_id, "sensor.bad");
    assert!(bad.outcome.is_err());
}

/// Executor that tracks how many fetches run at once, to prove the batch
/// admission cap holds.
struct GaugedExecutor {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl QueryExecutor for GaugedExecutor {
    async fn fetch(&self, _query: &BuiltQuery) -> CoreResult<Vec<RawStateRow>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        // Hold the slot long enough for the whole batch to contend.
        tokio::time::sleep(StdDuration::from_millis(25)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![RawStateRow {
            entity_id: "sensor.slow".into(),
            state: "on".into(),
            last_updated_ts: Some(1_768_737_600.0),
            ..Default::default()
        }])
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn batch_fan_out_respects_concurrency_cap() {
    let executor = Arc::new(GaugedExecutor {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let store = StateStore::with_executor(
        Arc::clone(&executor) as Arc<dyn QueryExecutor>,
        SchemaProfile::select(Engine::Sqlite, SchemaEra::NormalizedMeta),
        DEFAULT_QUERY_TIMEOUT,
    );

    let mut config = test_config();
    config.batch_concurrency = 2;
    let resolver = Arc::new(HybridResolver::with_parts(
        config,
        Some(store),
        None,
        test_api(),
        EntityRegistry::default(),
        false,
    ));

    let entities: Vec<String> = (0..12).map(|i| format!("sensor.slow_{}", i)).collect();
    let resolved = Arc::clone(&resolver).batch_history(entities, None, Some(5)).await;

    assert_eq!(resolved.status, DegradationStatus::PrimaryAvailable);
    assert_eq!(resolved.value.len(), 12);
    assert!(resolved.value.iter().all(|entry| entry.outcome.is_ok()));

    let peak = executor.peak.load(Ordering::SeqCst);
    assert!(peak >= 1, "no fetch was observed");
    assert!(peak <= 2, "observed {} concurrent fetches with a cap of 2", peak);
}

#[tokio::test]
async fn degraded_history_without_live_source_is_unavailable() {
    // Store gone and the live API port closed: the request (and only the
    // request) ends up unavailable.
    let resolver = HybridResolver::with_parts(
        test_config(),
        None,
        Some(CoreError::Connection("recorder unreachable".into())),
        test_api(),
        EntityRegistry::default(),
        false,
    );

    let filter = hascope_core::EntityFilter::Exact("sensor.x".into());
    let resolved = resolver.entity_history(&filter, None, Some(5)).await;
    assert_eq!(resolved.status, DegradationStatus::Unavailable);
    assert!(resolved.value.is_err());
    assert!(resolved.degradation_reason.is_some());
}

#[tokio::test]
async fn primary_history_stays_unflagged() {
    let dir = TempDir::new().unwrap();
    let error_time = Utc.with_ymd_and_hms(2026, 1, 18, 12, 0, 0).unwrap();
    let url = correlation_fixture(&dir, error_time);
    let store = StateStore::connect(&url, SchemaEra::NormalizedMeta, 2, DEFAULT_QUERY_TIMEOUT)
        .await
        .unwrap();

    let resolver = HybridResolver::with_parts(
        test_config(),
        Some(store),
        None,
        test_api(),
        EntityRegistry::default(),
        false,
    );

    let filter = hascope_core::EntityFilter::Exact("sensor.x".into());
    let resolved = resolver.entity_history(&filter, None, None).await;
    assert_eq!(resolved.status, DegradationStatus::PrimaryAvailable);
    assert!(resolved.degradation_reason.is_none());
    assert_eq!(resolved.value.unwrap().records.len(), 4);
}
