// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Process-wide registry of query entries
//!
//! Entries are addressed by the canonical encoding of their key. An entry
//! lives from its first access until it has had no subscribers for its
//! garbage-collection delay, or until it is removed explicitly.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

use super::entry::{EntrySummary, QueryEntry, SubscriberId};
use crate::config::ClientConfig;
use crate::error::QueryResult;
use crate::key::Key;

/// Counters describing cache activity since the client was built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub fetches_started: u64,
    pub dedup_joins: u64,
    pub fresh_hits: u64,
    pub superseded: u64,
    pub cancelled: u64,
    pub successes: u64,
    pub failures: u64,
    pub invalidations: u64,
    pub gc_evictions: u64,
    pub hook_failures: u64,
    pub mutations_run: u64,
}

impl CacheStats {
    /// Share of query accesses served without a new fetch
    pub fn hit_rate(&self) -> f64 {
        let hits = self.dedup_joins + self.fresh_hits;
        let total = hits + self.fetches_started;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub(crate) struct QueryCache {
    pub(crate) entries: RwLock<HashMap<String, QueryEntry>>,
    next_seq: AtomicU64,
    next_subscriber: AtomicU64,
    next_generation: AtomicU64,
    stale_time: Duration,
    gc_time: Duration,
    stats: Mutex<CacheStats>,
}

impl QueryCache {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            next_subscriber: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            stale_time: config.stale_time,
            gc_time: config.gc_time,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn stale_time_for(&self, entry: &QueryEntry) -> Duration {
        entry.options.stale_time.unwrap_or(self.stale_time)
    }

    /// Fetch generations are unique across entries, so a fetch outliving a
    /// removed entry can never match a re-created one.
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        update(&mut self.stats.lock());
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Fetch or create the entry for `key` inside an already-held write lock.
    ///
    /// A newly created entry has no subscribers, so its GC timer is armed.
    pub fn entry_mut<'a>(
        self: &Arc<Self>,
        entries: &'a mut HashMap<String, QueryEntry>,
        key: &Key,
        hash: &str,
    ) -> &'a mut QueryEntry {
        entries.entry(hash.to_string()).or_insert_with(|| {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let mut entry = QueryEntry::new(key.clone(), hash.to_string(), seq);
            log::debug!("Created query entry {}", hash);
            self.arm_gc(&mut entry);
            entry
        })
    }

    pub fn ensure(self: &Arc<Self>, key: &Key) -> QueryResult<EntrySummary> {
        key.validate()?;
        let hash = key.encode();
        let mut entries = self.entries.write();
        let entry = self.entry_mut(&mut entries, key, &hash);
        Ok(entry.summary(Instant::now()))
    }

    pub fn get(&self, key: &Key) -> Option<EntrySummary> {
        let now = Instant::now();
        self.entries
            .read()
            .get(&key.encode())
            .map(|entry| entry.summary(now))
    }

    pub fn subscribe(self: &Arc<Self>, key: &Key, label: Option<String>) -> QueryResult<SubscriberId> {
        key.validate()?;
        let hash = key.encode();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        let entry = self.entry_mut(&mut entries, key, &hash);
        if entry.gc_task.is_some() {
            log::debug!("Re-subscription cancels pending removal of {}", hash);
        }
        Self::disarm_gc(entry);
        entry.subscribers.insert(id, label);
        log::debug!("Subscriber {} attached to {} (active={})", id, hash, entry.active());
        Ok(id)
    }

    /// Detach a subscriber; the last one out arms the GC timer
    pub fn unsubscribe(self: &Arc<Self>, key: &Key, id: SubscriberId) -> bool {
        let hash = key.encode();
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&hash) else {
            return false;
        };
        if entry.subscribers.remove(&id).is_none() {
            return false;
        }
        log::debug!("Subscriber {} detached from {} (active={})", id, hash, entry.active());
        if entry.active() == 0 {
            self.arm_gc(entry);
        }
        true
    }

    /// Unconditional eviction. An outstanding fetch is signalled and its
    /// result discarded.
    pub fn remove(&self, key: &Key) -> bool {
        let removed = self.entries.write().remove(&key.encode());
        match removed {
            Some(entry) => {
                Self::retire(entry);
                log::debug!("Removed query entry {}", key);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) -> usize {
        let drained: Vec<QueryEntry> = self.entries.write().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        drained.into_iter().for_each(Self::retire);
        log::debug!("Cleared {} query entries", count);
        count
    }

    fn retire(mut entry: QueryEntry) {
        if let Some(in_flight) = entry.in_flight.take() {
            in_flight.token.cancel();
        }
        if let Some(task) = entry.gc_task.take() {
            task.abort();
        }
    }

    /// Read-only summaries ordered by entry creation
    pub fn snapshot(&self) -> Vec<EntrySummary> {
        let now = Instant::now();
        let entries = self.entries.read();
        let mut ordered: Vec<&QueryEntry> = entries.values().collect();
        ordered.sort_by_key(|entry| entry.seq);
        ordered.into_iter().map(|entry| entry.summary(now)).collect()
    }

    /// Canonical keys of entries matched by `prefix`, in creation order
    pub fn matching(&self, prefix: &Key, exact: bool) -> Vec<String> {
        let entries = self.entries.read();
        let mut matched: Vec<&QueryEntry> = if exact {
            entries.get(&prefix.encode()).into_iter().collect()
        } else {
            entries
                .values()
                .filter(|entry| prefix.is_prefix_of(&entry.key))
                .collect()
        };
        matched.sort_by_key(|entry| entry.seq);
        matched.into_iter().map(|entry| entry.hash.clone()).collect()
    }

    /// Seed entries from persisted records without fetching.
    ///
    /// Records for entries that already hold newer data, or that are
    /// fetching, are skipped.
    pub fn restore(self: &Arc<Self>, records: &[EntrySummary]) -> usize {
        let now = Instant::now();
        let mut restored = 0;
        let mut entries = self.entries.write();
        for record in records {
            if let Err(err) = record.key.validate() {
                log::warn!("Skipping persisted record: {}", err);
                continue;
            }
            let hash = record.key.encode();
            let entry = self.entry_mut(&mut entries, &record.key, &hash);
            let newer = match (entry.last_fetched_at, record.last_fetched_at) {
                (Some(current), Some(incoming)) => current >= incoming,
                (Some(_), None) => true,
                _ => false,
            };
            if newer || entry.is_fetching() {
                continue;
            }
            let stale_time = self.stale_time_for(entry);
            entry.seed(record, stale_time, now);
            restored += 1;
        }
        restored
    }

    /// Schedule removal after the entry's GC delay if it is idle
    pub fn arm_gc(self: &Arc<Self>, entry: &mut QueryEntry) {
        if entry.active() > 0 || entry.is_fetching() {
            return;
        }
        Self::disarm_gc(entry);

        let Ok(handle) = Handle::try_current() else {
            log::debug!("No tokio runtime; {} will not be garbage-collected", entry.hash);
            return;
        };

        let gc_time = entry.options.gc_time.unwrap_or(self.gc_time);
        let epoch = entry.gc_epoch;
        let hash = entry.hash.clone();
        let cache = Arc::downgrade(self);
        entry.gc_task = Some(handle.spawn(async move {
            tokio::time::sleep(gc_time).await;
            if let Some(cache) = cache.upgrade() {
                cache.collect(&hash, epoch);
            }
        }));
    }

    pub fn disarm_gc(entry: &mut QueryEntry) {
        if let Some(task) = entry.gc_task.take() {
            task.abort();
        }
        entry.gc_epoch += 1;
    }

    fn collect(&self, hash: &str, epoch: u64) -> bool {
        let mut entries = self.entries.write();
        let eligible = entries.get(hash).is_some_and(|entry| {
            entry.gc_epoch == epoch && entry.active() == 0 && !entry.is_fetching()
        });
        if !eligible {
            return false;
        }
        entries.remove(hash);
        drop(entries);

        self.record(|stats| stats.gc_evictions += 1);
        log::debug!("Garbage-collected query entry {}", hash);
        true
    }
}
