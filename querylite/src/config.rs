// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Client configuration and per-query options

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{QueryError, QueryResult};

pub const ENV_STALE_TIME_MS: &str = "QUERYLITE_STALE_TIME_MS";
pub const ENV_GC_TIME_MS: &str = "QUERYLITE_GC_TIME_MS";
pub const ENV_REFETCH_ON_INVALIDATE: &str = "QUERYLITE_REFETCH_ON_INVALIDATE";

/// Global client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long data stays fresh after a successful fetch
    pub stale_time: Duration,

    /// How long an entry with no subscribers is kept before removal
    pub gc_time: Duration,

    /// Refetch active entries when they are invalidated
    pub refetch_on_invalidate: bool,

    /// Invalidation-triggered refetches supersede fetches already in flight
    pub cancel_refetch_on_invalidate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(300), // 5 minutes
            refetch_on_invalidate: true,
            cancel_refetch_on_invalidate: true,
        }
    }
}

impl ClientConfig {
    /// Configuration for data that rarely changes
    pub fn long_lived() -> Self {
        Self {
            stale_time: Duration::from_secs(60),
            gc_time: Duration::from_secs(1800), // 30 minutes
            ..Self::default()
        }
    }

    /// Configuration with short timers for tests
    pub fn testing() -> Self {
        Self {
            gc_time: Duration::from_millis(100),
            ..Self::default()
        }
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    /// Parse a JSON document; missing fields fall back to defaults
    pub fn from_json_str(json: &str) -> QueryResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|e| QueryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `QUERYLITE_*` environment variables
    pub fn from_env() -> QueryResult<Self> {
        let mut config = Self::default();

        if let Some(ms) = read_env_u64(ENV_STALE_TIME_MS)? {
            config.stale_time = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env_u64(ENV_GC_TIME_MS)? {
            config.gc_time = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var(ENV_REFETCH_ON_INVALIDATE) {
            config.refetch_on_invalidate = match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(QueryError::Config(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_REFETCH_ON_INVALIDATE, other
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> QueryResult<()> {
        if self.gc_time.is_zero() {
            return Err(QueryError::Config(
                "gc_time must be greater than zero; use remove() for immediate eviction"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env_u64(name: &str) -> QueryResult<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| QueryError::Config(format!("{} must be milliseconds: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Per-query overrides of the client defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
}

impl QueryOptions {
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }
}
