//! The `history` subcommand: state history for one entity, with optional
//! statistics, in markdown, CSV or JSON.

use std::collections::BTreeSet;

use chrono::Utc;
use clap::ValueEnum;
use hascope_core::record::StateRecord;
use hascope_core::store::HistoryPage;
use hascope_core::{
    compute_statistics, parse_datetime, parse_timeframe, CoreError, DegradationStatus,
    EntityFilter, HascopeConfig, HybridResolver, Statistics, TimeWindow,
};
use serde_json::json;

use crate::errors::{
    EXIT_CONFIG, EXIT_GENERAL_ERROR, EXIT_STORE_UNAVAILABLE, EXIT_SUCCESS, EXIT_USAGE,
};
use crate::output::{self, MarkdownDoc};

/// Standard attributes excluded from CSV columns; they rarely vary and
/// drown out the entity-specific ones.
const STANDARD_ATTRIBUTES: [&str; 8] = [
    "friendly_name",
    "icon",
    "entity_picture",
    "assumed_state",
    "unit_of_measurement",
    "attribution",
    "device_class",
    "supported_features",
];

/// Markdown tables cap out here; CSV and JSON carry everything.
const TABLE_ROW_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HistoryFormat {
    Markdown,
    Csv,
    Json,
}

pub struct HistoryArgs {
    pub entity_id: String,
    pub timeframe: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: i64,
    pub stats: bool,
    pub format: HistoryFormat,
}

pub async fn run(args: HistoryArgs, verbose: bool) -> anyhow::Result<i32> {
    let config = match HascopeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(EXIT_CONFIG);
        }
    };

    let (window, description) = match resolve_window(
        args.timeframe.as_deref(),
        args.start.as_deref(),
        args.end.as_deref(),
    ) {
        Ok(resolved) => resolved,
        Err(message) => {
            output::print_error(&message);
            return Ok(EXIT_USAGE);
        }
    };
    let limit = match resolve_limit(args.limit) {
        Ok(limit) => limit,
        Err(message) => {
            output::print_error(&message);
            return Ok(EXIT_USAGE);
        }
    };

    output::print_verbose(verbose, &format!("fetching history for {}...", args.entity_id));
    let resolver = match HybridResolver::connect(config, verbose).await {
        Ok(resolver) => resolver,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(EXIT_CONFIG);
        }
    };

    let filter = EntityFilter::from_input(&args.entity_id);
    let resolved = resolver.entity_history(&filter, Some(&window), limit).await;
    let status = resolved.status;
    let reason = resolved.degradation_reason;

    if status == DegradationStatus::DegradedFallback {
        if let Some(reason) = &reason {
            output::print_warning(&format!("store unavailable, served from live API: {}", reason));
        }
    }

    let page = match resolved.value {
        Ok(page) => page,
        Err(e) => {
            output::print_error(&e.to_string());
            return Ok(match status {
                DegradationStatus::Unavailable => EXIT_STORE_UNAVAILABLE,
                _ => EXIT_GENERAL_ERROR,
            });
        }
    };

    if let Some(stats) = &page.stats {
        output::print_verbose(verbose, &format!("history query: {}ms", stats.query_time_ms));
        output::print_verbose(
            verbose,
            &format!("total records for entity: {}", stats.total_records),
        );
        output::print_verbose(
            verbose,
            &format!("records in timeframe: {}", stats.filtered_count),
        );
    }

    if page.records.is_empty() {
        output::print_warning(&format!(
            "no history found for {} {}",
            args.entity_id, description
        ));
        return Ok(EXIT_SUCCESS);
    }

    let stats = if args.stats { compute_statistics(&page.records) } else { None };

    match args.format {
        HistoryFormat::Markdown => println!(
            "{}",
            render_markdown(&page, &args.entity_id, &description, stats.as_ref())
        ),
        HistoryFormat::Csv => print!("{}", render_csv(&page.records)),
        HistoryFormat::Json => println!(
            "{}",
            render_json(&args.entity_id, &page, stats.as_ref(), status, reason.as_ref())?
        ),
    }
    Ok(EXIT_SUCCESS)
}

/// Resolve CLI time options into a window plus a human description.
///
/// Combinations: start+end, start+timeframe (span forward from start),
/// start alone (to now), or a relative timeframe ending now (default 24h).
fn resolve_window(
    timeframe: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(TimeWindow, String), String> {
    if end.is_some() && start.is_none() {
        return Err("--end requires --start".to_string());
    }
    if start.is_some() && end.is_some() && timeframe.is_some() {
        return Err("--end and --timeframe are mutually exclusive when --start is given".to_string());
    }

    if let Some(start_text) = start {
        let parsed_start = parse_datetime(start_text).map_err(|e| e.to_string())?;

        if let Some(end_text) = end {
            let parsed_end = parse_datetime(end_text).map_err(|e| e.to_string())?;
            if parsed_start >= parsed_end {
                return Err("--start must be before --end".to_string());
            }
            return Ok((
                TimeWindow::new(parsed_start, parsed_end),
                format!("from {} to {}", start_text, end_text),
            ));
        }

        if let Some(token) = timeframe {
            let span = parse_timeframe(token).map_err(|e| e.to_string())?;
            let end = parsed_start
                .checked_add_signed(span)
                .ok_or_else(|| format!("timeframe {} reaches past the representable range", token))?;
            return Ok((
                TimeWindow::new(parsed_start, end),
                format!("from {} ({})", start_text, token),
            ));
        }

        return Ok((
            TimeWindow::new(parsed_start, Utc::now()),
            format!("since {}", start_text),
        ));
    }

    let token = timeframe.unwrap_or("24h");
    let span = parse_timeframe(token).map_err(|e| e.to_string())?;
    Ok((TimeWindow::ending_now(span), format!("in the last {}", token)))
}

/// Translate the `--limit` flag: negative means unlimited, anything wider
/// than u32 is rejected rather than silently truncated.
fn resolve_limit(limit: i64) -> Result<Option<u32>, String> {
    if limit < 0 {
        return Ok(None);
    }
    u32::try_from(limit)
        .map(Some)
        .map_err(|_| format!("--limit {} is out of range (use -1 for no limit)", limit))
}

fn render_markdown(
    page: &HistoryPage,
    entity_id: &str,
    description: &str,
    stats: Option<&Statistics>,
) -> String {
    let mut doc = MarkdownDoc::new(format!("History: {}", entity_id));
    doc.add_section(
        "Summary",
        &format!(
            "Found **{}** state changes **{}**",
            page.records.len(),
            description
        ),
    );

    if let Some(stats) = stats {
        let mut lines = Vec::new();
        if let Some(numeric) = &stats.numeric {
            lines.push(format!("**Min:** {:.2}", numeric.min));
            lines.push(format!("**Max:** {:.2}", numeric.max));
            lines.push(format!("**Average:** {:.2}", numeric.avg));
            lines.push(format!("**Samples:** {}", numeric.numeric_count));
        } else {
            lines.push("**State Distribution:**".to_string());
            for (state, count) in stats.counts_by_frequency() {
                let pct = count as f64 / stats.total_records as f64 * 100.0;
                lines.push(format!("- `{}`: {} ({:.1}%)", state, count, pct));
            }
        }
        doc.add_section("Statistics", &lines.join("\n"));
    }

    let rows: Vec<Vec<String>> = page
        .records
        .iter()
        .take(TABLE_ROW_CAP)
        .map(|record| {
            vec![
                output::format_timestamp(record.raw_last_updated),
                record.state.clone(),
                record
                    .raw_last_changed
                    .map(output::format_timestamp)
                    .unwrap_or_else(|| "Never".to_string()),
            ]
        })
        .collect();
    doc.add_table(Some("State History"), &["Timestamp", "State", "Changed"], &rows);

    if page.records.len() > TABLE_ROW_CAP {
        doc.add_paragraph(&format!(
            "*Showing {} of {}. Use --limit or --format csv for more.*",
            TABLE_ROW_CAP,
            page.records.len()
        ));
    }

    doc.render()
}

/// CSV with one `attr_*` column per entity-specific attribute key seen in
/// the result set; standard attributes are excluded.
fn render_csv(records: &[StateRecord]) -> String {
    let mut attr_keys: BTreeSet<&str> = BTreeSet::new();
    for record in records {
        attr_keys.extend(
            record
                .attributes
                .keys()
                .map(String::as_str)
                .filter(|key| !STANDARD_ATTRIBUTES.contains(key)),
        );
    }

    let mut headers = vec![
        "timestamp".to_string(),
        "state".to_string(),
        "last_changed".to_string(),
    ];
    headers.extend(attr_keys.iter().map(|key| format!("attr_{}", key)));

    let mut out = String::new();
    out.push_str(
        &headers.iter().map(|h| output::csv_field(h)).collect::<Vec<_>>().join(","),
    );
    out.push('\n');

    for record in records {
        let mut fields = vec![
            record.raw_last_updated.to_rfc3339(),
            record.state.clone(),
            record
                .raw_last_changed
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ];
        for key in &attr_keys {
            fields.push(match record.attributes.get(*key) {
                None => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            });
        }
        out.push_str(
            &fields.iter().map(|f| output::csv_field(f)).collect::<Vec<_>>().join(","),
        );
        out.push('\n');
    }
    out
}

fn render_json(
    entity_id: &str,
    page: &HistoryPage,
    stats: Option<&Statistics>,
    status: DegradationStatus,
    reason: Option<&CoreError>,
) -> anyhow::Result<String> {
    let value = json!({
        "entity_id": entity_id,
        "degradation_status": status,
        "degradation_reason": reason.map(|e| e.to_string()),
        "records": page.records,
        "statistics": stats,
        "query": page.stats,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}
