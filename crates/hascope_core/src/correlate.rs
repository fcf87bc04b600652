//! Error/state-transition correlation.
//!
//! For every error event that references entities, look at state
//! transitions inside a symmetric window around the error and score them
//! by proximity. The aggregate strength is the best single match, not the
//! average: one transition right next to the error is better evidence than
//! many distant ones.
//!
//! This is a documented heuristic; correlation does not claim causality.

use chrono::Duration;
use serde::Serialize;
use tracing::debug;

use crate::error::CoreResult;
use crate::events::ErrorEvent;
use crate::query::EntityFilter;
use crate::record::StateRecord;
use crate::store::StateStore;
use crate::timeframe::TimeWindow;

/// Correlation policy knobs with the reference defaults.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationPolicy {
    /// Half-width of the symmetric window around each error.
    pub half_width: Duration,
    /// Budget: events correlated per run.
    pub max_events: usize,
    /// Budget: results returned per run.
    pub max_results: usize,
    /// Budget: per-entity query row limit.
    pub per_entity_limit: u32,
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        CorrelationPolicy {
            half_width: Duration::minutes(10),
            max_events: 20,
            max_results: 10,
            per_entity_limit: 10,
        }
    }
}

/// One scored transition near an error.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatch {
    pub record: StateRecord,
    /// Previous state the transition moved away from.
    pub previous_state: String,
    /// Proximity score in [0, 1].
    pub score: f64,
}

/// Correlation outcome for one error event.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
    pub error_event: ErrorEvent,
    #[serde(skip)]
    pub window: TimeWindow,
    /// Scored transitions, best first.
    pub matches: Vec<CorrelationMatch>,
    /// Best single match score; 0.0 when nothing matched.
    pub strength: f64,
}

/// Extract transitions from a store result (newest first): records whose
/// state differs from the immediately preceding record. The oldest record
/// in the window has no predecessor and can never be a transition.
pub fn transitions(records: &[StateRecord]) -> Vec<(StateRecord, String)> {
    let mut chronological: Vec<&StateRecord> = records.iter().collect();
    chronological.sort_by_key(|r| r.effective_timestamp);

    let mut out = Vec::new();
    for pair in chronological.windows(2) {
        if pair[0].state != pair[1].state {
            out.push((pair[1].clone(), pair[0].state.clone()));
        }
    }
    out
}

/// Proximity score for a transition at distance `dt` from the error, with
/// window half-width `half`.
fn proximity_score(dt: Duration, half: Duration) -> f64 {
    let dt_ms = dt.num_milliseconds().unsigned_abs() as f64;
    let half_ms = half.num_milliseconds().abs() as f64;
    if half_ms <= 0.0 {
        return 0.0;
    }
    (1.0 - dt_ms / half_ms).max(0.0)
}

/// Correlate one error event against the store.
///
/// Zero references or zero in-window transitions yield an empty match list
/// with strength 0.0; that is a valid outcome, not an error.
pub async fn correlate_event(
    store: &StateStore,
    event: ErrorEvent,
    policy: &CorrelationPolicy,
) -> CoreResult<CorrelationResult> {
    let window = TimeWindow::around(event.timestamp, policy.half_width);
    let mut matches: Vec<CorrelationMatch> = Vec::new();

    for entity_id in &event.referenced_entity_ids {
        let filter = EntityFilter::Exact(entity_id.clone());
        let page = store
            .entity_states(Some(&filter), Some(&window), Some(policy.per_entity_limit), false)
            .await?;

        for (record, previous_state) in transitions(&page.records) {
            let dt = record.effective_timestamp - event.timestamp;
            let score = proximity_score(dt, policy.half_width);
            matches.push(CorrelationMatch { record, previous_state, score });
        }
    }

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let strength = matches.first().map(|m| m.score).unwrap_or(0.0);

    debug!(
        "correlated error at {} against {} entities: {} matches, strength {:.2}",
        event.timestamp,
        event.referenced_entity_ids.len(),
        matches.len(),
        strength
    );

    Ok(CorrelationResult { error_event: event, window, matches, strength })
}

/// Correlate a batch of events under the policy budgets; results are
/// ordered by descending strength.
pub async fn correlate_events(
    store: &StateStore,
    events: Vec<ErrorEvent>,
    policy: &CorrelationPolicy,
) -> CoreResult<Vec<CorrelationResult>> {
    let mut results = Vec::new();

    for event in events.into_iter().take(policy.max_events) {
        if event.referenced_entity_ids.is_empty() {
            continue;
        }
        results.push(correlate_event(store, event, policy).await?);
    }

    results.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(policy.max_results);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RawStateRow;
    use approx::assert_abs_diff_eq;

    fn record(state: &str, epoch: f64) -> StateRecord {
        StateRecord::from_raw(RawStateRow {
            entity_id: "sensor.x".to_string(),
            state: state.to_string(),
            last_updated_ts: Some(epoch),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn transitions_require_a_state_change() {
        // Store order: newest first.
        let records = vec![
            record("on", 300.0),
            record("on", 200.0),
            record("off", 100.0),
        ];
        let t = transitions(&records);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].0.state, "on");
        assert_eq!(t[0].0.effective_timestamp.timestamp(), 200);
        assert_eq!(t[0].1, "off");
    }

    #[test]
    fn oldest_record_is_never_a_transition() {
        let records = vec![record("off", 100.0)];
        assert!(transitions(&records).is_empty());
    }

    #[test]
    fn score_decays_linearly_with_distance() {
        let half = Duration::minutes(10);
        assert_abs_diff_eq!(proximity_score(Duration::zero(), half), 1.0);
        assert_abs_diff_eq!(proximity_score(Duration::minutes(-2), half), 0.8, epsilon = 1e-9);
        assert_abs_diff_eq!(proximity_score(Duration::minutes(5), half), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(proximity_score(Duration::minutes(10), half), 0.0);
        assert_abs_diff_eq!(proximity_score(Duration::minutes(20), half), 0.0);
    }
}
