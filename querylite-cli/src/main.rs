// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! QueryLite CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments first to get log level
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        // Default to Warn (can still be overridden by RUST_LOG env var)
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "QueryLite".bold().green(), querylite::VERSION);
            println!("Async query cache");
            Ok(())
        }

        Commands::Inspect {
            file,
            prefix,
            format,
        } => cli::handle_inspect(file, prefix, format),

        Commands::Stats { file, format } => cli::handle_stats(file, format),

        Commands::Prune {
            file,
            max_age_secs,
            dry_run,
        } => cli::handle_prune(file, max_age_secs, dry_run),
    }
}
