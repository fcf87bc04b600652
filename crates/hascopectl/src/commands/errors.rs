//! The `errors` subcommand: runtime error collection across the live API
//! and persisted log files, with optional state-transition correlation.

use chrono::{Duration, Utc};
use clap::ValueEnum;
use hascope_core::{
    CorrelationResult, DegradationStatus, ErrorEvent, EventSource, HascopeConfig, HybridResolver,
    parse_timeframe,
};
use serde_json::json;

use crate::errors::{EXIT_CONFIG, EXIT_GENERAL_ERROR, EXIT_SUCCESS, EXIT_USAGE};
use crate::output::{self, MarkdownDoc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ErrorsFormat {
    Markdown,
    Json,
}

pub struct ErrorsArgs {
    pub current: bool,
    pub log: Option<String>,
    pub entity: Option<String>,
    pub integration: Option<String>,
    pub correlation: bool,
    pub format: ErrorsFormat,
}

pub async fn run(args: ErrorsArgs, verbose: bool) -> anyhow::Result<i32> {
    let config = match HascopeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(EXIT_CONFIG);
        }
    };

    let log_since = match args.log.as_deref() {
        Some(token) => match parse_timeframe(token) {
            Ok(span) => Some(Utc::now() - span),
            Err(e) => {
                output::print_error(&e.to_string());
                return Ok(EXIT_USAGE);
            }
        },
        // Without --log, still scan the last hour of persisted logs so a
        // freshly rotated live log does not hide recent errors.
        None => Some(Utc::now() - Duration::hours(1)),
    };

    output::print_info("analyzing errors...");
    let resolver = match HybridResolver::connect(config, verbose).await {
        Ok(resolver) => resolver,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(EXIT_CONFIG);
        }
    };

    let collected = resolver
        .collect_errors(log_since, args.entity.as_deref(), args.integration.as_deref())
        .await;
    let status = collected.status;
    let reason = collected.degradation_reason;
    if status == DegradationStatus::DegradedFallback {
        if let Some(reason) = &reason {
            output::print_warning(&format!("live error source unavailable: {}", reason));
        }
    }

    let mut events = collected.value;
    if args.current && args.log.is_none() {
        events = restrict_to_current(events);
    }
    output::print_verbose(verbose, &format!("collected {} error events", events.len()));

    let correlations = if args.correlation && !events.is_empty() {
        let resolved = resolver.correlate(events.clone()).await;
        if let Some(reason) = &resolved.degradation_reason {
            output::print_warning(&reason.to_string());
        }
        match resolved.value {
            Ok(results) => results,
            Err(e) => {
                output::print_error(&e.to_string());
                return Ok(EXIT_GENERAL_ERROR);
            }
        }
    } else {
        Vec::new()
    };

    match args.format {
        ErrorsFormat::Markdown => {
            println!("{}", render_markdown(&events, &correlations, &resolver))
        }
        ErrorsFormat::Json => {
            println!("{}", render_json(&events, &correlations, status, reason.as_ref().map(|e| e.to_string()))?)
        }
    }
    Ok(EXIT_SUCCESS)
}

/// `--current` narrows to the live snapshot, keeping log events only when
/// the live source produced nothing at all.
fn restrict_to_current(events: Vec<ErrorEvent>) -> Vec<ErrorEvent> {
    let live: Vec<ErrorEvent> = events
        .iter()
        .filter(|e| e.source == EventSource::Live)
        .cloned()
        .collect();
    if live.is_empty() {
        events
    } else {
        live
    }
}

fn render_markdown(
    events: &[ErrorEvent],
    correlations: &[CorrelationResult],
    resolver: &HybridResolver,
) -> String {
    let mut doc = MarkdownDoc::new("Error Analysis");
    doc.add_section("Summary", &format!("Found **{}** error events", events.len()));

    if events.is_empty() {
        doc.add_paragraph("No errors found.");
        return doc.render();
    }

    let rows: Vec<Vec<String>> = events
        .iter()
        .map(|event| {
            vec![
                output::format_timestamp(event.timestamp),
                match event.source {
                    EventSource::Live => "live",
                    EventSource::Log => "log",
                }
                .to_string(),
                event.integration.clone().unwrap_or_default(),
                output::truncate(&event.message, 120),
            ]
        })
        .collect();
    doc.add_table(
        Some("Errors"),
        &["Time", "Source", "Integration", "Message"],
        &rows,
    );

    if !correlations.is_empty() {
        let mut lines = Vec::new();
        for result in correlations {
            lines.push(format!(
                "**{}** {} (strength {:.2})",
                output::format_timestamp(result.error_event.timestamp),
                output::truncate(&result.error_event.message, 80),
                result.strength
            ));
            for m in &result.matches {
                lines.push(format!(
                    "- {} ({}): `{}` -> `{}` at {} (score {:.2})",
                    m.record.entity_id,
                    resolver.registry().friendly_name(&m.record.entity_id),
                    m.previous_state,
                    m.record.state,
                    output::format_timestamp(m.record.effective_timestamp),
                    m.score
                ));
            }
        }
        doc.add_section("Correlations", &lines.join("\n"));
    }

    doc.render()
}

fn render_json(
    events: &[ErrorEvent],
    correlations: &[CorrelationResult],
    status: DegradationStatus,
    reason: Option<String>,
) -> anyhow::Result<String> {
    let value = json!({
        "degradation_status": status,
        "degradation_reason": reason,
        "events": events,
        "correlations": correlations,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}
