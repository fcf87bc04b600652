//! Live Home Assistant API client.
//!
//! The live error/state source and the degraded-mode history fallback.
//! Significantly slower than direct store access; the resolver only leans
//! on it when the store is unavailable.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::events::{ErrorEvent, EventSource};
use crate::logsource::{parse_log_text, strip_ansi_codes};
use crate::record::{parse_attributes, StateRecord};
use crate::timeframe::TimeWindow;

/// Shape of `/api/states` and `/api/history/period` entries.
#[derive(Debug, Deserialize)]
struct ApiState {
    entity_id: Option<String>,
    state: Option<String>,
    last_changed: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
    attributes: Option<serde_json::Value>,
}

impl ApiState {
    /// API states normalize under the same COALESCE invariant as store
    /// rows: no usable timestamp means the entry is dropped. Entries that
    /// name no entity and have no fallback to inherit are dropped too;
    /// a record never carries an empty entity id.
    fn into_record(self, fallback_entity: &str) -> Option<StateRecord> {
        let effective = self.last_changed.or(self.last_updated)?;
        let entity_id = match self.entity_id {
            Some(id) if !id.is_empty() => id,
            _ if !fallback_entity.is_empty() => fallback_entity.to_string(),
            _ => return None,
        };
        let attributes = match self.attributes {
            Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
            Some(other) => parse_attributes(other.as_str()),
            None => Default::default(),
        };
        Some(StateRecord {
            entity_id,
            state: self.state.unwrap_or_default(),
            effective_timestamp: effective,
            raw_last_changed: self.last_changed,
            raw_last_updated: self.last_updated.unwrap_or(effective),
            attributes,
        })
    }
}

/// Async REST client with bearer-token auth and a bounded timeout.
#[derive(Debug)]
pub struct LiveApi {
    client: reqwest::Client,
    base_url: String,
}

impl LiveApi {
    pub fn new(url: &str, access_token: &str, timeout: Duration) -> CoreResult<LiveApi> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| CoreError::Config(format!("invalid access token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Connection(e.to_string()))?;

        Ok(LiveApi {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    fn transport(err: reqwest::Error) -> CoreError {
        CoreError::Connection(err.to_string())
    }

    /// Probe `/api/` for reachability and authentication.
    pub async fn ping(&self) -> CoreResult<()> {
        let response = self
            .client
            .get(format!("{}/api/", self.base_url))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CoreError::Connection(format!(
                "API ping failed: HTTP {}",
                response.status()
            )))
        }
    }

    /// Current entity states, used to seed the vocabulary when the
    /// registry storage file is unreadable.
    pub async fn states(&self) -> CoreResult<Vec<StateRecord>> {
        let response = self
            .client
            .get(format!("{}/api/states", self.base_url))
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(CoreError::Connection(format!(
                "failed to get states: HTTP {}",
                response.status()
            )));
        }
        let states: Vec<ApiState> = response.json().await.map_err(Self::transport)?;
        Ok(states.into_iter().filter_map(|s| s.into_record("")).collect())
    }

    /// Fetch the error log as normalized events. Tries the standard
    /// `/api/error_log` first, then the Supervisor endpoint used by HA OS
    /// installations (whose output is ANSI-colored).
    pub async fn error_events(&self, levels: &BTreeSet<String>) -> CoreResult<Vec<ErrorEvent>> {
        let endpoints = [
            format!("{}/api/error_log", self.base_url),
            format!("{}/api/hassio/core/logs", self.base_url),
        ];

        let mut last_err = CoreError::Connection("no error log endpoint responded".to_string());
        for endpoint in endpoints {
            match self.client.get(&endpoint).send().await {
                Ok(response) if response.status().is_success() => {
                    let text = response.text().await.map_err(Self::transport)?;
                    let text = strip_ansi_codes(&text);
                    let mut events = parse_log_text(&text, None, levels);
                    for event in &mut events {
                        event.source = EventSource::Live;
                    }
                    debug!("live source produced {} events via {}", events.len(), endpoint);
                    return Ok(events);
                }
                Ok(response) => {
                    last_err =
                        CoreError::Connection(format!("{}: HTTP {}", endpoint, response.status()));
                }
                Err(e) => last_err = Self::transport(e),
            }
        }
        Err(last_err)
    }

    /// History fallback via `/api/history/period/<start>?filter_entity_id=`.
    /// Returns records newest first to match the store's ordering contract.
    pub async fn entity_history(
        &self,
        entity_id: &str,
        window: &TimeWindow,
    ) -> CoreResult<Vec<StateRecord>> {
        let url = format!(
            "{}/api/history/period/{}",
            self.base_url,
            window.start().to_rfc3339()
        );
        let response = self
            .client
            .get(url)
            .query(&[
                ("filter_entity_id", entity_id),
                ("end_time", &window.end().to_rfc3339()),
            ])
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(CoreError::Connection(format!(
                "failed to get history for {}: HTTP {}",
                entity_id,
                response.status()
            )));
        }

        // The endpoint returns one list per entity, oldest first.
        let lists: Vec<Vec<ApiState>> = response.json().await.map_err(Self::transport)?;
        let mut records: Vec<StateRecord> = lists
            .into_iter()
            .flatten()
            .filter_map(|s| s.into_record(entity_id))
            .collect();
        records.sort_by(|a, b| b.effective_timestamp.cmp(&a.effective_timestamp));
        Ok(records)
    }
}
