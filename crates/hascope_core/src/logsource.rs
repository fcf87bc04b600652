//! Persisted log source.
//!
//! Parses Home-Assistant-format log text into normalized error events:
//!
//! ```text
//! 2026-01-15 10:30:45.123 ERROR (MainThread) [homeassistant.components.knx] Message
//!     continuation / traceback lines
//! ```
//!
//! Continuation lines fold into the preceding event's context. Unparseable
//! lines never abort a scan.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::events::{ErrorEvent, EventSource};

static LOG_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}(?:\.\d+)?)\s+(ERROR|WARNING|CRITICAL|INFO|DEBUG)\s+\(([^)]+)\)\s+\[([^\]]+)\]\s*(.*)$",
    )
    .expect("log line grammar is valid")
});

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ansi grammar is valid"));

/// Log levels to keep when the caller does not say otherwise.
pub fn default_levels() -> BTreeSet<String> {
    ["ERROR", "WARNING"].iter().map(|s| s.to_string()).collect()
}

/// Remove ANSI escape codes (Supervisor logs are colored).
pub fn strip_ansi_codes(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

fn parse_log_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    None
}

/// Parse log text into error events, newest last (file order).
///
/// `since` drops events older than the cutoff; `levels` filters by log
/// level. The integration tag is taken from the bracketed component.
pub fn parse_log_text(
    text: &str,
    since: Option<DateTime<Utc>>,
    levels: &BTreeSet<String>,
) -> Vec<ErrorEvent> {
    let mut events: Vec<ErrorEvent> = Vec::new();
    let mut current: Option<(ErrorEvent, Vec<String>)> = None;

    let mut finish = |slot: &mut Option<(ErrorEvent, Vec<String>)>, out: &mut Vec<ErrorEvent>| {
        if let Some((mut event, context)) = slot.take() {
            if !context.is_empty() {
                event.message = format!("{}\n{}", event.message, context.join("\n"));
            }
            out.push(event);
        }
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        match LOG_LINE_RE.captures(line) {
            Some(caps) => {
                finish(&mut current, &mut events);

                let level = caps[2].to_string();
                if !levels.contains(&level) {
                    continue;
                }

                let timestamp = match parse_log_timestamp(&caps[1]) {
                    Some(t) => t,
                    None => Utc::now(),
                };
                if since.is_some_and(|cutoff| timestamp < cutoff) {
                    continue;
                }

                let mut event = ErrorEvent::new(timestamp, caps[5].to_string(), EventSource::Log);
                event.integration = Some(caps[4].to_string());
                current = Some((event, Vec::new()));
            }
            None => {
                // Continuation line (traceback etc.) for the open event.
                if let Some((_, context)) = current.as_mut() {
                    context.push(line.to_string());
                }
            }
        }
    }
    finish(&mut current, &mut events);

    events
}

/// Candidate log file locations relative to the configured HA config path.
pub fn candidate_log_paths(ha_config_path: &Path) -> Vec<PathBuf> {
    vec![
        ha_config_path.join("home-assistant.log"),
        ha_config_path.join("config").join("home-assistant.log"),
        PathBuf::from("/var/log/home-assistant.log"),
        PathBuf::from("/var/log/home-assistant/home-assistant.log"),
    ]
}

/// Scan log files for error events. Missing or unreadable files are
/// skipped with a warning; the scan itself never fails.
pub fn scan_log_files(
    ha_config_path: &Path,
    since: Option<DateTime<Utc>>,
    levels: &BTreeSet<String>,
) -> Vec<ErrorEvent> {
    let mut events = Vec::new();

    for path in candidate_log_paths(ha_config_path) {
        if !path.exists() {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let found = parse_log_text(&text, since, levels);
                debug!("found {} events in {}", found.len(), path.display());
                events.extend(found);
            }
            Err(e) => warn!("could not read log file {}: {}", path.display(), e),
        }
    }

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events
}
