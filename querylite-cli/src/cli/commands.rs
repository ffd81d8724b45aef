// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "querylite")]
#[command(author, version, about = "Inspect and maintain QueryLite cache snapshots", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<log::Level>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// List the entries of a snapshot file
    Inspect {
        /// Snapshot file written by the persister
        file: PathBuf,

        /// Only entries under this key prefix, as JSON (e.g. '["users"]')
        #[arg(short, long)]
        prefix: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Summarise a snapshot file
    Stats {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Remove entries last fetched longer ago than the given age
    Prune {
        file: PathBuf,

        /// Maximum entry age in seconds
        #[arg(long, default_value_t = 86_400)]
        max_age_secs: u64,

        /// Report what would be removed without rewriting the file
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}
