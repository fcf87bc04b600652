//! Descriptive statistics over normalized state records.
//!
//! Categorical counts always include every record, sentinels and numeric
//! values alike. The numeric summary only considers states that parse as a
//! number, excluding the sentinels "unknown"/"unavailable"/empty string.
//! Both views are computed together in one pass.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::StateRecord;

/// Numeric summary over the parseable, non-sentinel states.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub numeric_count: usize,
}

/// Descriptive statistics for one record sequence.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_records: usize,
    /// Counts per distinct state value, every record included.
    pub state_counts: BTreeMap<String, usize>,
    /// Present when at least one state parses as a number.
    pub numeric: Option<NumericSummary>,
}

impl Statistics {
    pub fn unique_states(&self) -> usize {
        self.state_counts.len()
    }

    /// State values ordered by descending count, for presentation.
    pub fn counts_by_frequency(&self) -> Vec<(&str, usize)> {
        let mut out: Vec<(&str, usize)> =
            self.state_counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        out
    }
}

/// Reduce a record sequence into statistics.
///
/// Empty input yields `None` — the explicit no-data marker — never a panic
/// or an error.
pub fn compute_statistics(records: &[StateRecord]) -> Option<Statistics> {
    if records.is_empty() {
        return None;
    }

    let mut state_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut numeric_values: Vec<f64> = Vec::new();

    for record in records {
        *state_counts.entry(record.state.clone()).or_insert(0) += 1;

        if !record.is_sentinel() {
            if let Ok(value) = record.state.parse::<f64>() {
                numeric_values.push(value);
            }
        }
    }

    let numeric = if numeric_values.is_empty() {
        None
    } else {
        let min = numeric_values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = numeric_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = numeric_values.iter().sum::<f64>() / numeric_values.len() as f64;
        Some(NumericSummary { min, max, avg, numeric_count: numeric_values.len() })
    };

    Some(Statistics {
        total_records: records.len(),
        state_counts,
        numeric,
    })
}
