// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers for QueryLite

use colored::Colorize;
use querylite::plugins::{FileStorage, PersistStorage, PersistedCache};
use querylite::{is_prefix, EntrySummary, Key};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::commands::OutputFormat;
use super::output::{SnapshotFormatter, SnapshotStats};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Load and verify a snapshot file
fn load_snapshot(path: &Path) -> CliResult<PersistedCache> {
    let storage = FileStorage::new(path);
    let payload = storage
        .load()?
        .ok_or_else(|| format!("Snapshot not found at {:?}", path))?;
    let snapshot = PersistedCache::from_json(&payload)
        .map_err(|e| format!("Invalid snapshot {:?}: {}", path, e))?;
    log::debug!(
        "Loaded snapshot {:?} with {} entries",
        path,
        snapshot.entries.len()
    );
    Ok(snapshot)
}

/// Entries under `prefix`, or all entries when no prefix is given
pub fn filter_entries(entries: Vec<EntrySummary>, prefix: Option<&Key>) -> Vec<EntrySummary> {
    match prefix {
        Some(prefix) => entries
            .into_iter()
            .filter(|entry| is_prefix(prefix, &entry.key))
            .collect(),
        None => entries,
    }
}

/// Handle the inspect command
pub fn handle_inspect(
    file: PathBuf,
    prefix: Option<String>,
    format: OutputFormat,
) -> CliResult<()> {
    let snapshot = load_snapshot(&file)?;
    let prefix = prefix
        .map(|raw| Key::try_from(raw.as_str()))
        .transpose()?;

    let entries = filter_entries(snapshot.entries, prefix.as_ref());
    print!("{}", SnapshotFormatter::format_entries(&entries, format));
    Ok(())
}

/// Handle the stats command
pub fn handle_stats(file: PathBuf, format: OutputFormat) -> CliResult<()> {
    let snapshot = load_snapshot(&file)?;
    let file_bytes = std::fs::metadata(&file)?.len();
    let stats = SnapshotStats::from_snapshot(&snapshot, file_bytes);
    print!("{}", SnapshotFormatter::format_stats(&stats, format));
    Ok(())
}

/// Handle the prune command
///
/// Rewrites the file through the same storage backend the persister uses, so
/// the result keeps a valid checksum and the original buster.
pub fn handle_prune(file: PathBuf, max_age_secs: u64, dry_run: bool) -> CliResult<()> {
    let mut snapshot = load_snapshot(&file)?;
    let before = snapshot.entries.len();
    let removed = snapshot.prune(Duration::from_secs(max_age_secs))?;

    if removed == 0 {
        println!("{}", "No expired entries".green());
        return Ok(());
    }

    if dry_run {
        println!(
            "{}",
            format!("Would remove {} of {} entries", removed, before).yellow()
        );
        return Ok(());
    }

    FileStorage::new(&file).save(&snapshot.to_json()?)?;
    println!(
        "{}",
        format!(
            "Removed {} of {} entries from {:?}",
            removed, before, file
        )
        .green()
    );
    Ok(())
}
