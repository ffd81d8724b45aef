// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Inspector plugin
//!
//! Records hook events in a bounded log and builds read-only reports of the
//! cache for external visualisation: per-entry state, which subscribers
//! reference which entries, and timing.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::Plugin;
use crate::client::QueryClient;
use crate::hooks::{HookEvent, HookPoint, HookRegistrar};
use crate::key::Key;
use crate::query::{CacheStats, QueryStatus, SubscriberId};

pub const DEFAULT_MAX_EVENTS: usize = 500;

/// One hook event as seen by the inspector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub point: HookPoint,
    pub key: Option<Key>,
    pub mutation: Option<String>,
    pub generation: Option<u64>,
    pub detail: Option<String>,
}

impl RecordedEvent {
    fn from_event(seq: u64, event: &HookEvent) -> Self {
        let (generation, detail) = match event {
            HookEvent::BeforeFetch { generation, .. } | HookEvent::Success { generation, .. } => {
                (Some(*generation), None)
            }
            HookEvent::Error {
                generation, error, ..
            } => (Some(*generation), Some(error.to_string())),
            HookEvent::Settled {
                generation, status, ..
            } => (Some(*generation), Some(status.to_string())),
            HookEvent::MutationSuccess { .. } => (None, None),
            HookEvent::MutationError { error, .. } => (None, Some(error.to_string())),
            HookEvent::MutationSettled { status, .. } => (None, Some(status.to_string())),
        };

        Self {
            seq,
            at: Utc::now(),
            point: event.point(),
            key: event.key().cloned(),
            mutation: event.mutation().map(|m| m.name.clone()),
            generation,
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectedEntry {
    pub key: Key,
    pub status: QueryStatus,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub active: usize,
    pub has_data: bool,
    pub error: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Milliseconds since the last successful fetch
    pub age_ms: Option<i64>,
    pub fetch_count: u64,
    pub failure_count: u32,
}

/// Subscriber → entry reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberEdge {
    pub subscriber: SubscriberId,
    pub label: Option<String>,
    pub key: Key,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<InspectedEntry>,
    pub edges: Vec<SubscriberEdge>,
    pub stats: CacheStats,
    pub plugins: Vec<String>,
    pub recent_events: Vec<RecordedEvent>,
}

impl InspectionReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone)]
pub struct InspectorPlugin {
    events: Arc<Mutex<VecDeque<RecordedEvent>>>,
    next_seq: Arc<AtomicU64>,
    max_events: usize,
}

impl Default for InspectorPlugin {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

impl InspectorPlugin {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            next_seq: Arc::new(AtomicU64::new(0)),
            max_events: max_events.max(1),
        }
    }

    fn record_event(&self, event: &HookEvent) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(RecordedEvent::from_event(seq, event));
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<RecordedEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Build a report of the client's cache without modifying it
    pub fn inspect(&self, client: &QueryClient) -> InspectionReport {
        let now = Utc::now();
        let snapshot = client.snapshot();

        let mut edges = Vec::new();
        let entries = snapshot
            .into_iter()
            .map(|summary| {
                edges.extend(summary.subscribers.iter().map(|sub| SubscriberEdge {
                    subscriber: sub.id,
                    label: sub.label.clone(),
                    key: summary.key.clone(),
                }));
                InspectedEntry {
                    age_ms: summary
                        .last_fetched_at
                        .map(|at| (now - at).num_milliseconds()),
                    has_data: summary.data.is_some(),
                    error: summary.error.as_ref().map(|e| e.to_string()),
                    key: summary.key,
                    status: summary.status,
                    is_stale: summary.is_stale,
                    is_fetching: summary.is_fetching,
                    active: summary.active,
                    last_fetched_at: summary.last_fetched_at,
                    fetch_count: summary.fetch_count,
                    failure_count: summary.failure_count,
                }
            })
            .collect();

        InspectionReport {
            generated_at: now,
            entries,
            edges,
            stats: client.stats(),
            plugins: client.plugin_names().into_iter().map(String::from).collect(),
            recent_events: self.recent_events(self.max_events),
        }
    }
}

impl Plugin for InspectorPlugin {
    fn name(&self) -> &str {
        "inspector"
    }

    fn register(&self, hooks: &mut HookRegistrar<'_>) {
        let inspector = self.clone();
        hooks.on_each(&HookPoint::ALL, move |_client, event| {
            inspector.record_event(event);
            Ok(())
        });
    }
}
