//! Terminal and document output.
//!
//! Status messages go to stderr with ASCII prefixes; rendered documents
//! (markdown, CSV, JSON) go to stdout so they can be piped cleanly.

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {}", message.red());
}

pub fn print_warning(message: &str) {
    eprintln!("[WARNING] {}", message.yellow());
}

pub fn print_info(message: &str) {
    eprintln!("[INFO] {}", message);
}

pub fn print_verbose(enabled: bool, message: &str) {
    if enabled {
        eprintln!("  {}", message.dimmed());
    }
}

/// Markdown document builder: a title, then sections and tables in
/// insertion order.
pub struct MarkdownDoc {
    title: String,
    sections: Vec<String>,
}

impl MarkdownDoc {
    pub fn new(title: impl Into<String>) -> MarkdownDoc {
        MarkdownDoc { title: title.into(), sections: Vec::new() }
    }

    pub fn add_section(&mut self, title: &str, content: &str) {
        self.sections.push(format!("## {}\n{}", title, content));
    }

    pub fn add_paragraph(&mut self, content: &str) {
        self.sections.push(content.to_string());
    }

    /// Add a table; an empty row set adds nothing.
    pub fn add_table(&mut self, title: Option<&str>, headers: &[&str], rows: &[Vec<String>]) {
        if rows.is_empty() {
            return;
        }
        if let Some(title) = title {
            self.sections.push(format!("### {}", title));
        }

        let mut lines = Vec::with_capacity(rows.len() + 2);
        lines.push(format!("| {} |", headers.join(" | ")));
        lines.push(format!("| {} |", vec!["---"; headers.len()].join(" | ")));
        for row in rows {
            let mut cells: Vec<&str> = row.iter().map(String::as_str).collect();
            cells.resize(headers.len(), "");
            lines.push(format!("| {} |", cells.join(" | ")));
        }
        self.sections.push(lines.join("\n"));
    }

    pub fn render(&self) -> String {
        let mut parts = vec![format!("# {}", self.title)];
        parts.extend(self.sections.iter().cloned());
        parts.join("\n\n")
    }
}

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_length.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Quote one CSV field per RFC 4180: fields containing a comma, quote or
/// newline are wrapped in quotes with inner quotes doubled.
pub fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
