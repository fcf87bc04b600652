//! Error event normalization.
//!
//! Two independently-shaped sources (live API error log, persisted log
//! files) normalize into one `ErrorEvent` stream. Entity references are
//! extracted from free-text messages against the known vocabulary of
//! entity ids; the merge rule dedups events that both sources saw.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where an error event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Live,
    Log,
}

/// One normalized error event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub source: EventSource,
    /// Integration/component tag when the source format carries one.
    pub integration: Option<String>,
    /// Entity ids the message text references, from the known vocabulary.
    pub referenced_entity_ids: BTreeSet<String>,
}

impl ErrorEvent {
    pub fn new(timestamp: DateTime<Utc>, message: String, source: EventSource) -> ErrorEvent {
        ErrorEvent {
            timestamp,
            message,
            source,
            integration: None,
            referenced_entity_ids: BTreeSet::new(),
        }
    }

    /// Populate entity references from the message text.
    pub fn with_references(mut self, vocabulary: &[String]) -> ErrorEvent {
        self.referenced_entity_ids = extract_entity_references(&self.message, vocabulary);
        self
    }
}

/// Minimum length of a bare object id before a substring hit counts as a
/// reference; shorter ids produce too many false positives.
const MIN_OBJECT_ID_LEN: usize = 4;

/// Extract entity references from free text.
///
/// An id from the vocabulary (domain.object_id shape) is referenced when
/// the full id occurs in the text, or when the bare object id does —
/// partial matches count, case-insensitively.
pub fn extract_entity_references(text: &str, vocabulary: &[String]) -> BTreeSet<String> {
    let haystack = text.to_lowercase();
    let mut refs = BTreeSet::new();

    for entity_id in vocabulary {
        let id = entity_id.to_lowercase();
        if haystack.contains(&id) {
            refs.insert(id);
            continue;
        }
        if let Some((_domain, object_id)) = id.split_once('.') {
            if object_id.len() >= MIN_OBJECT_ID_LEN && haystack.contains(object_id) {
                refs.insert(id);
            }
        }
    }

    refs
}

/// Substring filters matching the CLI's `--entity`/`--integration` options.
/// A `*` in the entity pattern is stripped; matching is plain substring.
pub fn filter_events(
    events: Vec<ErrorEvent>,
    entity: Option<&str>,
    integration: Option<&str>,
) -> Vec<ErrorEvent> {
    events
        .into_iter()
        .filter(|event| {
            if let Some(pattern) = entity {
                let needle = pattern.to_lowercase().replace('*', "");
                let hit = event.message.to_lowercase().contains(&needle)
                    || event.referenced_entity_ids.iter().any(|id| id.contains(&needle));
                if !hit {
                    return false;
                }
            }
            if let Some(pattern) = integration {
                let needle = pattern.to_lowercase();
                let hit = event
                    .integration
                    .as_deref()
                    .is_some_and(|i| i.to_lowercase().contains(&needle))
                    || event.message.to_lowercase().contains(&needle);
                if !hit {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Merge events from both sources into one stream, newest first.
///
/// Two events with identical second-truncated timestamp and identical
/// message text are the same incident observed twice; the `live` copy wins.
pub fn merge_events(events: Vec<ErrorEvent>) -> Vec<ErrorEvent> {
    let mut merged: Vec<ErrorEvent> = Vec::with_capacity(events.len());

    for event in events {
        let key = (event.timestamp.timestamp(), event.message.clone());
        match merged
            .iter_mut()
            .find(|e| (e.timestamp.timestamp(), e.message.clone()) == key)
        {
            Some(existing) => {
                if existing.source == EventSource::Log && event.source == EventSource::Live {
                    *existing = event;
                }
            }
            None => merged.push(event),
        }
    }

    merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    merged
}
