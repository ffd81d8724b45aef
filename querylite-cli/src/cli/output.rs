// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Snapshot formatting for CLI output

use chrono::{DateTime, Utc};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use querylite::plugins::PersistedCache;
use querylite::{EntrySummary, QueryStatus};

use super::commands::OutputFormat;

const PREVIEW_LEN: usize = 48;

/// Aggregate figures for one snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotStats {
    pub version: u32,
    pub buster: String,
    pub written_at: DateTime<Utc>,
    pub checksum: u32,
    pub file_bytes: u64,
    pub entries: usize,
    pub success: usize,
    pub error: usize,
    pub pending: usize,
    pub oldest_fetch: Option<DateTime<Utc>>,
    pub newest_fetch: Option<DateTime<Utc>>,
}

impl SnapshotStats {
    pub fn from_snapshot(snapshot: &PersistedCache, file_bytes: u64) -> Self {
        let count = |status: QueryStatus| {
            snapshot
                .entries
                .iter()
                .filter(|entry| entry.status == status)
                .count()
        };
        let fetched = snapshot.entries.iter().filter_map(|e| e.last_fetched_at);

        Self {
            version: snapshot.version,
            buster: snapshot.buster.clone(),
            written_at: snapshot.timestamp,
            checksum: snapshot.checksum,
            file_bytes,
            entries: snapshot.entries.len(),
            success: count(QueryStatus::Success),
            error: count(QueryStatus::Error),
            pending: count(QueryStatus::Pending),
            oldest_fetch: fetched.clone().min(),
            newest_fetch: fetched.max(),
        }
    }
}

/// Formatter for snapshot contents
pub struct SnapshotFormatter;

impl SnapshotFormatter {
    pub fn format_entries(entries: &[EntrySummary], format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::entries_table(entries),
            OutputFormat::Json => Self::entries_json(entries),
            OutputFormat::Csv => Self::entries_csv(entries),
        }
    }

    pub fn format_stats(stats: &SnapshotStats, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::stats_table(stats),
            OutputFormat::Json => Self::stats_json(stats),
            OutputFormat::Csv => Self::stats_csv(stats),
        }
    }

    fn entries_table(entries: &[EntrySummary]) -> String {
        if entries.is_empty() {
            return format!("{}\n", "No entries found".yellow());
        }

        let mut output = String::new();
        output.push_str(&format!("{}\n", "Cache Entries".bold().green()));
        output.push_str(&format!("Entries: {}\n\n", entries.len()));

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(
            ["Key", "Status", "Last Fetched", "Fetches", "Failures", "Data"]
                .iter()
                .map(|col| Cell::new(col).fg(Color::Green))
                .collect::<Vec<_>>(),
        );

        for entry in entries {
            let status = match entry.status {
                QueryStatus::Success => Cell::new("success").fg(Color::Green),
                QueryStatus::Error => Cell::new("error").fg(Color::Red),
                QueryStatus::Pending => Cell::new("pending").fg(Color::Yellow),
            };
            table.add_row(vec![
                Cell::new(entry.key.to_string()),
                status,
                Cell::new(Self::format_time(entry.last_fetched_at)),
                Cell::new(entry.fetch_count),
                Cell::new(entry.failure_count),
                Cell::new(Self::preview(entry)),
            ]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    fn entries_json(entries: &[EntrySummary]) -> String {
        let json = serde_json::json!({
            "status": "success",
            "count": entries.len(),
            "entries": entries,
        });
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize entries to JSON\"}"
                .to_string()
        })
    }

    fn entries_csv(entries: &[EntrySummary]) -> String {
        let mut output = String::from("key,status,last_fetched_at,fetch_count,failure_count,error\n");
        for entry in entries {
            let row = [
                Self::csv_field(&entry.key.to_string()),
                entry.status.to_string(),
                entry
                    .last_fetched_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                entry.fetch_count.to_string(),
                entry.failure_count.to_string(),
                entry
                    .error
                    .as_ref()
                    .map(|e| Self::csv_field(&e.message))
                    .unwrap_or_default(),
            ];
            output.push_str(&row.join(","));
            output.push('\n');
        }
        output
    }

    fn stats_table(stats: &SnapshotStats) -> String {
        let mut output = format!("{}\n", "Snapshot Statistics".bold().green());

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("Property").fg(Color::Green),
            Cell::new("Value").fg(Color::Green),
        ]);
        for (name, value) in Self::stats_rows(stats) {
            table.add_row(vec![name.to_string(), value]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        if stats.error > 0 {
            output.push_str(&format!(
                "\n{}\n",
                format!("{} entries hold a fetch error", stats.error).yellow()
            ));
        }
        output
    }

    fn stats_json(stats: &SnapshotStats) -> String {
        let json = serde_json::json!({
            "version": stats.version,
            "buster": stats.buster,
            "written_at": stats.written_at,
            "checksum": format!("{:08x}", stats.checksum),
            "file_bytes": stats.file_bytes,
            "entries": stats.entries,
            "by_status": {
                "success": stats.success,
                "error": stats.error,
                "pending": stats.pending,
            },
            "oldest_fetch": stats.oldest_fetch,
            "newest_fetch": stats.newest_fetch,
        });
        serde_json::to_string_pretty(&json).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize stats to JSON\"}".to_string()
        })
    }

    fn stats_csv(stats: &SnapshotStats) -> String {
        let mut output = String::from("property,value\n");
        for (name, value) in Self::stats_rows(stats) {
            output.push_str(&format!("{},{}\n", name, Self::csv_field(&value)));
        }
        output
    }

    fn stats_rows(stats: &SnapshotStats) -> Vec<(&'static str, String)> {
        vec![
            ("version", stats.version.to_string()),
            ("buster", stats.buster.clone()),
            ("written_at", stats.written_at.to_rfc3339()),
            ("checksum", format!("{:08x}", stats.checksum)),
            ("file_bytes", stats.file_bytes.to_string()),
            ("entries", stats.entries.to_string()),
            ("success", stats.success.to_string()),
            ("error", stats.error.to_string()),
            ("pending", stats.pending.to_string()),
            ("oldest_fetch", Self::format_time(stats.oldest_fetch)),
            ("newest_fetch", Self::format_time(stats.newest_fetch)),
        ]
    }

    fn format_time(at: Option<DateTime<Utc>>) -> String {
        at.map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    /// Short single-line rendering of an entry's data or error
    fn preview(entry: &EntrySummary) -> String {
        let text = match (&entry.data, &entry.error) {
            (_, Some(error)) if entry.status == QueryStatus::Error => format!("error: {}", error),
            (Some(data), _) => data.to_string(),
            (None, _) => "NULL".to_string(),
        };
        if text.chars().count() > PREVIEW_LEN {
            let cut: String = text.chars().take(PREVIEW_LEN - 3).collect();
            format!("{}...", cut)
        } else {
            text
        }
    }

    fn csv_field(s: &str) -> String {
        if s.contains(',') || s.contains('"') || s.contains('\n') {
            format!("\"{}\"", s.replace('"', "\"\""))
        } else {
            s.to_string()
        }
    }
}
