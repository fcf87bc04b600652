//! Hybrid resolver.
//!
//! The only component exposed to external callers. Owns store
//! availability, drives fallback, and stamps every result with the
//! `DegradationStatus` in effect when it was produced so presentation
//! layers can disclose reduced capability.
//!
//! Fallback is a visible branch on typed results, never a caught panic.
//! A resolver probes the store once at construction; promotion back to
//! primary happens by constructing a new resolver for the next top-level
//! request, never silently mid-request.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::LiveApi;
use crate::config::HascopeConfig;
use crate::correlate::{correlate_events, CorrelationPolicy, CorrelationResult};
use crate::error::{CoreError, CoreResult};
use crate::events::{filter_events, merge_events, ErrorEvent};
use crate::logsource::{default_levels, scan_log_files};
use crate::query::EntityFilter;
use crate::record::StateRecord;
use crate::registry::EntityRegistry;
use crate::store::{HistoryPage, StateStore};
use crate::timeframe::TimeWindow;

/// Tri-state capability level, mutated only by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationStatus {
    PrimaryAvailable,
    DegradedFallback,
    Unavailable,
}

/// A caller-facing result stamped with the capability level under which it
/// was produced. `degradation_reason` carries the error that forced a
/// reduced level; nothing is silently discarded.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub status: DegradationStatus,
    pub degradation_reason: Option<CoreError>,
}

impl<T> Resolved<T> {
    pub fn primary(value: T) -> Resolved<T> {
        Resolved { value, status: DegradationStatus::PrimaryAvailable, degradation_reason: None }
    }

    pub fn degraded(value: T, reason: CoreError) -> Resolved<T> {
        Resolved {
            value,
            status: DegradationStatus::DegradedFallback,
            degradation_reason: Some(reason),
        }
    }

    pub fn unavailable(value: T, reason: CoreError) -> Resolved<T> {
        Resolved { value, status: DegradationStatus::Unavailable, degradation_reason: Some(reason) }
    }
}

/// Per-entity outcome inside a batch; one entity's failure never
/// invalidates its siblings.
#[derive(Debug)]
pub struct EntityHistory {
    pub entity_id: String,
    pub outcome: CoreResult<HistoryPage>,
}

/// Orchestrates store, live API and registry for one logical session.
pub struct HybridResolver {
    config: HascopeConfig,
    store: Option<StateStore>,
    store_error: Option<CoreError>,
    api: LiveApi,
    registry: EntityRegistry,
    diagnostics: bool,
}

impl HybridResolver {
    /// Build a resolver: probe the store, load the registry. A store
    /// connection failure degrades the resolver instead of failing it.
    pub async fn connect(config: HascopeConfig, diagnostics: bool) -> CoreResult<HybridResolver> {
        let api = LiveApi::new(&config.api.url, &config.api.access_token, config.api_timeout())?;

        let (store, store_error) = match StateStore::connect(
            &config.database.url,
            config.schema_era()?,
            config.database.pool_size,
            config.query_timeout(),
        )
        .await
        {
            Ok(store) => {
                info!("primary store available ({})", store.profile().engine);
                (Some(store), None)
            }
            Err(e) => {
                warn!("primary store unavailable, degrading: {}", e);
                (None, Some(e))
            }
        };

        let registry = EntityRegistry::load(
            std::path::Path::new(&config.ha_config_path),
            Some(&api),
        )
        .await;
        debug!("registry vocabulary: {} entities", registry.len());

        Ok(HybridResolver { config, store, store_error, api, registry, diagnostics })
    }

    /// Test/embedding constructor wiring explicit collaborators.
    pub fn with_parts(
        config: HascopeConfig,
        store: Option<StateStore>,
        store_error: Option<CoreError>,
        api: LiveApi,
        registry: EntityRegistry,
        diagnostics: bool,
    ) -> HybridResolver {
        HybridResolver { config, store, store_error, api, registry, diagnostics }
    }

    pub fn status(&self) -> DegradationStatus {
        if self.store.is_some() {
            DegradationStatus::PrimaryAvailable
        } else {
            DegradationStatus::DegradedFallback
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    fn store_reason(&self) -> CoreError {
        self.store_error
            .clone()
            .unwrap_or_else(|| CoreError::Connection("store not connected".to_string()))
    }

    fn correlation_policy(&self) -> CorrelationPolicy {
        CorrelationPolicy {
            half_width: Duration::minutes(self.config.correlation.window_minutes),
            max_events: self.config.correlation.max_events,
            max_results: self.config.correlation.max_results,
            ..CorrelationPolicy::default()
        }
    }

    /// State history for one entity filter.
    ///
    /// Primary path queries the store. With the store gone the resolver
    /// falls back to the live API, which only serves exact entity ids
    /// (the window defaults to the last 24h there when absent). Both
    /// sources gone yields an `Unavailable` result for this request only.
    pub async fn entity_history(
        &self,
        filter: &EntityFilter,
        window: Option<&TimeWindow>,
        limit: Option<u32>,
    ) -> Resolved<CoreResult<HistoryPage>> {
        let mut degradation = self.store_error.clone();

        if let Some(store) = &self.store {
            match store.entity_states(Some(filter), window, limit, self.diagnostics).await {
                Ok(page) => return Resolved::primary(Ok(page)),
                Err(e) if e.is_degrading() => {
                    warn!("store query failed, trying live fallback: {}", e);
                    degradation = Some(e);
                }
                // Schema mismatches are configuration problems for this
                // connection; the fallback cannot paper over them.
                Err(e) => return Resolved::primary(Err(e)),
            }
        }

        let reason = degradation.unwrap_or_else(|| self.store_reason());
        let EntityFilter::Exact(entity_id) = filter else {
            return Resolved::degraded(
                Err(CoreError::Connection(
                    "wildcard history requires the primary store".to_string(),
                )),
                reason,
            );
        };

        let fallback_window =
            window.copied().unwrap_or_else(|| TimeWindow::ending_now(Duration::hours(24)));
        match self.api.entity_history(entity_id, &fallback_window).await {
            Ok(mut records) => {
                if let Some(limit) = limit {
                    records.truncate(limit as usize);
                }
                Resolved::degraded(Ok(HistoryPage { records, stats: None }), reason)
            }
            Err(api_err) => Resolved::unavailable(Err(api_err), reason),
        }
    }

    /// Concurrent per-entity history under the batch concurrency cap.
    ///
    /// Results come back in input order. Failures (including timeouts) are
    /// isolated per entity; no automatic retry.
    pub async fn batch_history(
        self: Arc<Self>,
        entity_ids: Vec<String>,
        window: Option<TimeWindow>,
        limit: Option<u32>,
    ) -> Resolved<Vec<EntityHistory>> {
        let cap = self.config.batch_concurrency.max(1);
        let admission = Arc::new(Semaphore::new(cap));
        let mut join_set: JoinSet<(usize, EntityHistory)> = JoinSet::new();

        for (index, entity_id) in entity_ids.iter().cloned().enumerate() {
            let resolver = Arc::clone(&self);
            let admission = Arc::clone(&admission);
            join_set.spawn(async move {
                let _permit = admission.acquire_owned().await;
                let filter = EntityFilter::Exact(entity_id.clone());
                let resolved =
                    resolver.entity_history(&filter, window.as_ref(), limit).await;
                (index, EntityHistory { entity_id, outcome: resolved.value })
            });
        }

        let mut slots: Vec<Option<EntityHistory>> = entity_ids.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, history)) => slots[index] = Some(history),
                Err(e) => warn!("batch task failed to join: {}", e),
            }
        }

        let results: Vec<EntityHistory> = slots
            .into_iter()
            .zip(entity_ids)
            .map(|(slot, entity_id)| {
                slot.unwrap_or(EntityHistory {
                    entity_id,
                    outcome: Err(CoreError::Connection("batch task aborted".to_string())),
                })
            })
            .collect();

        match self.status() {
            DegradationStatus::PrimaryAvailable => Resolved::primary(results),
            _ => Resolved::degraded(results, self.store_reason()),
        }
    }

    /// Collect error events from the live source and the persisted logs,
    /// tag entity references, filter and merge. A dead live source
    /// degrades to log-only collection.
    pub async fn collect_errors(
        &self,
        log_since: Option<DateTime<Utc>>,
        entity: Option<&str>,
        integration: Option<&str>,
    ) -> Resolved<Vec<ErrorEvent>> {
        let levels: BTreeSet<String> = default_levels();
        let vocabulary = self.registry.vocabulary();

        let (live, live_error) = match self.api.error_events(&levels).await {
            Ok(events) => (events, None),
            Err(e) => {
                warn!("live error source unavailable: {}", e);
                (Vec::new(), Some(e))
            }
        };

        let logged = scan_log_files(
            std::path::Path::new(&self.config.ha_config_path),
            log_since,
            &levels,
        );

        let events: Vec<ErrorEvent> = live
            .into_iter()
            .chain(logged)
            .map(|e| e.with_references(&vocabulary))
            .collect();
        let events = filter_events(events, entity, integration);
        let merged = merge_events(events);
        debug!("collected {} error events after merge", merged.len());

        match live_error {
            None => Resolved::primary(merged),
            Some(e) => Resolved::degraded(merged, e),
        }
    }

    /// Correlate error events with nearby state transitions.
    ///
    /// Requires the store: without it this degrades to an empty, flagged
    /// result (`CorrelationUnavailable`), never a process failure.
    pub async fn correlate(
        &self,
        events: Vec<ErrorEvent>,
    ) -> Resolved<CoreResult<Vec<CorrelationResult>>> {
        let Some(store) = &self.store else {
            let reason = CoreError::CorrelationUnavailable(self.store_reason().to_string());
            return Resolved::degraded(Ok(Vec::new()), reason);
        };

        let policy = self.correlation_policy();
        match correlate_events(store, events, &policy).await {
            Ok(results) => Resolved::primary(Ok(results)),
            Err(e) if e.is_degrading() => {
                let reason = CoreError::CorrelationUnavailable(e.to_string());
                Resolved::degraded(Ok(Vec::new()), reason)
            }
            Err(e) => Resolved::primary(Err(e)),
        }
    }

    /// Current live states, the degraded-mode substitute for history
    /// summaries.
    pub async fn live_states(&self) -> CoreResult<Vec<StateRecord>> {
        self.api.states().await
    }
}
