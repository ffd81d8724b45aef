// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for QueryLite
//!
//! Reads cache snapshots written by the persister's file storage: list
//! their entries, summarise them, and prune expired records.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{handle_inspect, handle_prune, handle_stats};
