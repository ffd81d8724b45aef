// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-key entry state machine
//!
//! ```text
//!            begin_fetch                 settle_success
//!  Pending ───────────────► Pending ──────────────────► Success
//!     ▲                        │                          │
//!     │                        │ settle_error             │ begin_fetch
//!     │                        ▼                          ▼
//!     └──────────────────── Error ◄──────────────────── Pending
//! ```
//!
//! `data` survives errors; `error` is cleared only by a successful settle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::coordinator::{QueryFn, SharedFetch, Successor};
use crate::config::QueryOptions;
use crate::error::FetchError;
use crate::key::Key;

/// Status of a query entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        };
        write!(f, "{}", name)
    }
}

pub type SubscriberId = u64;

/// A live subscriber attached to an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub label: Option<String>,
}

/// Read-only view of an entry, also the snapshot/persistence record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub key: Key,
    pub status: QueryStatus,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<FetchError>,
    #[serde(default)]
    pub last_fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_stale: bool,
    #[serde(default)]
    pub is_fetching: bool,
    #[serde(default)]
    pub active: usize,
    #[serde(default)]
    pub fetch_count: u64,
    #[serde(default)]
    pub failure_count: u32,
    /// Live subscribers; never persisted
    #[serde(skip)]
    pub subscribers: Vec<SubscriberInfo>,
}

impl EntrySummary {
    /// Minimal record for seeding an entry through restore
    pub fn seeded(key: Key, data: Value) -> Self {
        Self {
            key,
            status: QueryStatus::Success,
            data: Some(data),
            error: None,
            last_fetched_at: Some(Utc::now()),
            is_stale: false,
            is_fetching: false,
            active: 0,
            fetch_count: 0,
            failure_count: 0,
            subscribers: Vec::new(),
        }
    }
}

/// The authoritative outstanding fetch of an entry
pub(crate) struct InFlight {
    pub generation: u64,
    pub token: CancellationToken,
    pub shared: SharedFetch,
    /// Set to the replacing fetch when this one is superseded
    pub successor: Successor,
    /// Status to fall back to if the fetch is cancelled without replacement
    pub previous_status: QueryStatus,
}

pub(crate) struct QueryEntry {
    pub key: Key,
    pub hash: String,
    pub seq: u64,
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Monotonic time of the last data update; `None` until data exists
    pub updated_at: Option<Instant>,
    /// `None` with `updated_at` set means the data never goes stale
    pub stale_at: Option<Instant>,
    pub invalidated: bool,
    pub subscribers: BTreeMap<SubscriberId, Option<String>>,
    pub in_flight: Option<InFlight>,
    pub generation: u64,
    pub query_fn: Option<QueryFn>,
    pub options: QueryOptions,
    pub gc_task: Option<JoinHandle<()>>,
    pub gc_epoch: u64,
    pub fetch_count: u64,
    pub failure_count: u32,
}

impl QueryEntry {
    pub fn new(key: Key, hash: String, seq: u64) -> Self {
        Self {
            key,
            hash,
            seq,
            status: QueryStatus::Pending,
            data: None,
            error: None,
            last_fetched_at: None,
            updated_at: None,
            stale_at: None,
            invalidated: false,
            subscribers: BTreeMap::new(),
            in_flight: None,
            generation: 0,
            query_fn: None,
            options: QueryOptions::default(),
            gc_task: None,
            gc_epoch: 0,
            fetch_count: 0,
            failure_count: 0,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated || self.updated_at.is_none() {
            return true;
        }
        self.stale_at.is_some_and(|at| now >= at)
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn active(&self) -> usize {
        self.subscribers.len()
    }

    /// Current generation of the authoritative fetch, if one is outstanding
    pub fn in_flight_generation(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.generation)
    }

    pub fn begin_fetch(&mut self, in_flight: InFlight) {
        self.status = QueryStatus::Pending;
        self.in_flight = Some(in_flight);
        self.fetch_count += 1;
    }

    pub fn settle_success(&mut self, data: Value, stale_time: Duration, now: Instant) {
        self.in_flight = None;
        self.status = QueryStatus::Success;
        self.apply_data(data, stale_time, now);
        self.error = None;
        self.failure_count = 0;
    }

    pub fn settle_error(&mut self, error: FetchError) {
        self.in_flight = None;
        self.status = QueryStatus::Error;
        self.error = Some(error);
        self.failure_count += 1;
    }

    /// Signal the outstanding fetch and revert to the status it replaced
    pub fn cancel_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.token.cancel();
                self.status = in_flight.previous_status;
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&mut self, now: Instant) {
        self.stale_at = Some(now);
        self.invalidated = true;
    }

    /// Data written without a fetch (optimistic updates, seeding)
    pub fn set_data(&mut self, data: Value, stale_time: Duration, now: Instant) {
        if !self.is_fetching() {
            self.status = QueryStatus::Success;
        }
        self.apply_data(data, stale_time, now);
        self.error = None;
    }

    /// Seed state from a persisted record, bypassing a live fetch
    pub fn seed(&mut self, record: &EntrySummary, stale_time: Duration, now: Instant) {
        self.data = record.data.clone();
        self.error = record.error.clone();
        self.last_fetched_at = record.last_fetched_at;
        self.failure_count = record.failure_count;
        self.invalidated = false;
        self.status = match record.status {
            QueryStatus::Pending if self.data.is_some() => QueryStatus::Success,
            status => status,
        };

        if self.data.is_none() {
            self.updated_at = None;
            self.stale_at = None;
            return;
        }

        self.updated_at = Some(now);
        self.stale_at = if self.status == QueryStatus::Error {
            Some(now)
        } else {
            let age = record
                .last_fetched_at
                .and_then(|at| (Utc::now() - at).to_std().ok())
                .unwrap_or(Duration::ZERO);
            now.checked_add(stale_time.saturating_sub(age))
        };
    }

    fn apply_data(&mut self, data: Value, stale_time: Duration, now: Instant) {
        self.data = Some(data);
        self.last_fetched_at = Some(Utc::now());
        self.updated_at = Some(now);
        self.stale_at = now.checked_add(stale_time);
        self.invalidated = false;
    }

    pub fn summary(&self, now: Instant) -> EntrySummary {
        EntrySummary {
            key: self.key.clone(),
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            is_stale: self.is_stale(now),
            is_fetching: self.is_fetching(),
            active: self.active(),
            fetch_count: self.fetch_count,
            failure_count: self.failure_count,
            subscribers: self
                .subscribers
                .iter()
                .map(|(id, label)| SubscriberInfo {
                    id: *id,
                    label: label.clone(),
                })
                .collect(),
        }
    }
}
