//! Logical state records.
//!
//! All physical layouts normalize into `StateRecord`. The key invariant:
//! the effective timestamp is the COALESCE of "last changed" and
//! "last updated"; a row with both absent is invalid and is dropped, never
//! surfaced.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

/// State sentinels that never parse as data values.
pub const SENTINEL_STATES: [&str; 3] = ["unknown", "unavailable", ""];

/// One row as produced by a query executor: nullable epoch-second floats
/// and the attributes payload in its stored textual form.
#[derive(Debug, Clone, Default)]
pub struct RawStateRow {
    pub entity_id: String,
    pub state: String,
    pub last_changed_ts: Option<f64>,
    pub last_updated_ts: Option<f64>,
    pub attributes: Option<String>,
    pub filtered_count: Option<i64>,
    pub total_records: Option<i64>,
}

/// A normalized entity state, owned by the caller of the store.
#[derive(Debug, Clone, Serialize)]
pub struct StateRecord {
    pub entity_id: String,
    /// May be a sentinel such as "unknown" or "unavailable".
    pub state: String,
    /// COALESCE of the raw timestamps.
    pub effective_timestamp: DateTime<Utc>,
    pub raw_last_changed: Option<DateTime<Utc>>,
    pub raw_last_updated: DateTime<Utc>,
    /// Ordered attribute mapping; malformed payloads degrade to empty.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Query diagnostics, attached only when the caller requested detail.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueryStats {
    /// All state records for the entity, ignoring the window.
    pub total_records: i64,
    /// Records matching the filters, before LIMIT.
    pub filtered_count: i64,
    /// Wall-clock query time.
    pub query_time_ms: u64,
}

fn epoch_to_utc(epoch: f64) -> Option<DateTime<Utc>> {
    let micros = (epoch * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros).single()
}

impl StateRecord {
    /// Normalize a raw row. Returns `None` when both timestamps are absent
    /// or unrepresentable; such rows are dropped.
    pub fn from_raw(raw: RawStateRow) -> Option<StateRecord> {
        let raw_last_changed = raw.last_changed_ts.and_then(epoch_to_utc);
        let raw_last_updated = raw.last_updated_ts.and_then(epoch_to_utc);

        let effective_timestamp = raw_last_changed.or(raw_last_updated)?;
        // A row with a changed timestamp but no updated one does not occur
        // in any supported schema; fall back to the effective value.
        let raw_last_updated = raw_last_updated.unwrap_or(effective_timestamp);

        Some(StateRecord {
            entity_id: raw.entity_id,
            state: raw.state,
            effective_timestamp,
            raw_last_changed,
            raw_last_updated,
            attributes: parse_attributes(raw.attributes.as_deref()),
        })
    }

    /// Whether the state carries no data value.
    pub fn is_sentinel(&self) -> bool {
        SENTINEL_STATES.contains(&self.state.as_str())
    }
}

/// Deserialize a stored attributes payload. Malformed or non-object
/// payloads degrade to an empty mapping for that record rather than
/// failing the whole query.
pub fn parse_attributes(payload: Option<&str>) -> BTreeMap<String, serde_json::Value> {
    let Some(text) = payload else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        Ok(_) | Err(_) => {
            debug!("dropping malformed attributes payload ({} bytes)", text.len());
            BTreeMap::new()
        }
    }
}

/// Normalize a batch of raw rows, dropping invalid ones and pulling the
/// diagnostic counters off the first row when present.
pub fn normalize_rows(rows: Vec<RawStateRow>) -> (Vec<StateRecord>, Option<(i64, i64)>) {
    let counters = rows
        .first()
        .and_then(|r| Some((r.total_records?, r.filtered_count?)));
    let records = rows.into_iter().filter_map(StateRecord::from_raw).collect();
    (records, counters)
}
