// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The query client: entry point to the cache engine
//!
//! A `QueryClient` owns one cache registry, one frozen hook bus and the
//! installed plugins. It is cheap to clone; all clones share the same state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::QueryResult;
use crate::hooks::{HookBus, HookCallback, HookEvent, HookOutcome, HookPoint, HookRegistrar};
use crate::key::Key;
use crate::plugins::Plugin;
use crate::query::{
    CacheStats, EntrySummary, FetchOptions, QueryCache, QueryFn, SubscriberId,
};

/// Owner name for callbacks registered directly on the builder
const CLIENT_OWNER: &str = "client";

pub(crate) struct ClientInner {
    config: ClientConfig,
    cache: Arc<QueryCache>,
    hooks: HookBus,
    plugins: Vec<Arc<dyn Plugin>>,
}

/// Shared handle to a query cache
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

/// Non-owning handle held by in-flight fetches
#[derive(Clone)]
pub(crate) struct WeakClient(Weak<ClientInner>);

impl WeakClient {
    pub fn upgrade(&self) -> Option<QueryClient> {
        self.0.upgrade().map(|inner| QueryClient { inner })
    }
}

/// Options for [`QueryClient::invalidate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateOptions {
    /// Only the entry whose key equals the prefix
    pub exact: bool,
    /// Refetch matched entries that have subscribers
    pub refetch_active: bool,
    /// Supersede in-flight fetches; `None` uses the client configuration
    pub cancel_refetch: Option<bool>,
}

impl Default for InvalidateOptions {
    fn default() -> Self {
        Self {
            exact: false,
            refetch_active: true,
            cancel_refetch: None,
        }
    }
}

impl InvalidateOptions {
    pub fn exact() -> Self {
        Self {
            exact: true,
            ..Self::default()
        }
    }

    /// Mark stale without refetching anything
    pub fn mark_only() -> Self {
        Self {
            refetch_active: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationResult {
    pub matched: usize,
    pub refetched: usize,
}

enum Install {
    Plugin(Arc<dyn Plugin>),
    Callback(HookPoint, HookCallback),
}

/// Builder for [`QueryClient`]
///
/// Plugins and callbacks register in the order they are added; that order
/// is the invocation order on the hook bus and the decorator order of the
/// fetch chain (first added is outermost).
pub struct QueryClientBuilder {
    config: ClientConfig,
    installs: Vec<Install>,
}

impl Default for QueryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            installs: Vec::new(),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plugin<P: Plugin + 'static>(self, plugin: P) -> Self {
        self.plugin_arc(Arc::new(plugin))
    }

    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.installs.push(Install::Plugin(plugin));
        self
    }

    /// Register an application callback
    pub fn on<F>(mut self, point: HookPoint, callback: F) -> Self
    where
        F: Fn(&QueryClient, &HookEvent) -> HookOutcome + Send + Sync + 'static,
    {
        self.installs
            .push(Install::Callback(point, Arc::new(callback)));
        self
    }

    pub fn build(self) -> QueryResult<QueryClient> {
        self.config.validate()?;

        let mut hooks = HookBus::new();
        let mut plugins = Vec::new();
        for install in self.installs {
            match install {
                Install::Plugin(plugin) => {
                    log::debug!("Installing plugin '{}'", plugin.name());
                    plugin.register(&mut HookRegistrar::new(&mut hooks, plugin.name()));
                    plugins.push(plugin);
                }
                Install::Callback(point, callback) => {
                    hooks.register(CLIENT_OWNER, point, callback);
                }
            }
        }

        Ok(QueryClient::from_parts(self.config, hooks, plugins))
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClient {
    /// Client with the default configuration and no plugins
    pub fn new() -> Self {
        Self::from_parts(ClientConfig::default(), HookBus::new(), Vec::new())
    }

    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::new()
    }

    pub fn with_config(config: ClientConfig) -> QueryResult<Self> {
        Self::builder().config(config).build()
    }

    fn from_parts(config: ClientConfig, hooks: HookBus, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let cache = Arc::new(QueryCache::new(&config));
        Self {
            inner: Arc::new(ClientInner {
                config,
                cache,
                hooks,
                plugins,
            }),
        }
    }

    pub(crate) fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn hooks(&self) -> &HookBus {
        &self.inner.hooks
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.inner.plugins.iter().map(|p| p.name()).collect()
    }

    /// Apply the plugin decorator chain to a base fetch function
    pub(crate) fn wrap_fetch(&self, base: QueryFn) -> QueryFn {
        self.inner
            .plugins
            .iter()
            .rev()
            .fold(base, |next, plugin| plugin.wrap_fetch(next))
    }

    /// Run every callback for the event; failures are counted, not returned
    pub(crate) fn publish(&self, event: &HookEvent) {
        let failures = self.inner.hooks.publish(self, event);
        if !failures.is_empty() {
            let count = failures.len() as u64;
            self.cache().record(|stats| stats.hook_failures += count);
        }
    }

    /// Existing entry for `key`, or a new `Pending` one
    pub fn ensure(&self, key: &Key) -> QueryResult<EntrySummary> {
        self.cache().ensure(key)
    }

    pub fn get_entry(&self, key: &Key) -> Option<EntrySummary> {
        self.cache().get(key)
    }

    pub fn get_query_data(&self, key: &Key) -> Option<Value> {
        self.cache()
            .entries
            .read()
            .get(&key.encode())
            .and_then(|entry| entry.data.clone())
    }

    /// Write data as if a fetch had succeeded, without running one
    pub fn set_query_data(&self, key: &Key, data: Value) -> QueryResult<()> {
        key.validate()?;
        let hash = key.encode();
        let cache = self.cache();
        let mut entries = cache.entries.write();
        let entry = cache.entry_mut(&mut entries, key, &hash);
        let stale_time = cache.stale_time_for(entry);
        entry.set_data(data, stale_time, Instant::now());
        log::debug!("Set query data for {}", hash);
        Ok(())
    }

    /// Attach a subscriber; the returned guard detaches it on drop
    pub fn subscribe(&self, key: &Key, label: Option<&str>) -> QueryResult<Subscription> {
        let id = self
            .cache()
            .subscribe(key, label.map(str::to_string))?;
        Ok(Subscription {
            client: self.clone(),
            key: key.clone(),
            id,
            attached: true,
        })
    }

    /// Detach a subscriber by id; unknown ids are ignored
    pub fn unsubscribe(&self, key: &Key, id: SubscriberId) -> bool {
        self.cache().unsubscribe(key, id)
    }

    /// Mark entries matching `prefix` stale and refetch the active ones
    pub fn invalidate(
        &self,
        prefix: &Key,
        options: InvalidateOptions,
    ) -> QueryResult<InvalidationResult> {
        prefix.validate()?;
        let hashes = self.cache().matching(prefix, options.exact);
        log::debug!(
            "Invalidating {} ({} matched, exact={})",
            prefix,
            hashes.len(),
            options.exact
        );
        Ok(self.invalidate_hashes(hashes, options))
    }

    pub fn invalidate_all(&self) -> InvalidationResult {
        let hashes: Vec<String> = self
            .cache()
            .snapshot()
            .iter()
            .map(|summary| summary.key.encode())
            .collect();
        self.invalidate_hashes(hashes, InvalidateOptions::default())
    }

    fn invalidate_hashes(
        &self,
        hashes: Vec<String>,
        options: InvalidateOptions,
    ) -> InvalidationResult {
        let cache = self.cache();
        let now = Instant::now();
        let mut result = InvalidationResult::default();
        let mut active = Vec::new();
        {
            let mut entries = cache.entries.write();
            for hash in &hashes {
                let Some(entry) = entries.get_mut(hash) else {
                    continue;
                };
                entry.invalidate(now);
                result.matched += 1;
                if options.refetch_active && entry.active() > 0 && entry.query_fn.is_some() {
                    active.push(entry.key.clone());
                }
            }
        }
        cache.record(|stats| stats.invalidations += result.matched as u64);

        if active.is_empty() {
            return result;
        }
        if !self.config().refetch_on_invalidate {
            return result;
        }
        if Handle::try_current().is_err() {
            log::debug!(
                "No tokio runtime; {} active entries marked stale only",
                active.len()
            );
            return result;
        }

        let fetch_options = FetchOptions {
            cancel_refetch: options
                .cancel_refetch
                .unwrap_or(self.config().cancel_refetch_on_invalidate),
            query: None,
        };
        for key in active {
            match self.start_fetch(&key, None, fetch_options) {
                Ok(_) => result.refetched += 1,
                Err(err) => log::warn!("Refetch after invalidation of {} failed: {}", key, err),
            }
        }
        result
    }

    /// Unconditional eviction; returns whether an entry existed
    pub fn remove(&self, key: &Key) -> bool {
        self.cache().remove(key)
    }

    pub fn clear(&self) -> usize {
        self.cache().clear()
    }

    /// Read-only entry records in creation order
    pub fn snapshot(&self) -> Vec<EntrySummary> {
        self.cache().snapshot()
    }

    /// Seed entries from snapshot records without fetching
    pub fn restore(&self, records: &[EntrySummary]) -> usize {
        let restored = self.cache().restore(records);
        log::info!("Restored {} of {} cache records", restored, records.len());
        restored
    }

    /// Number of entries with a fetch in flight, optionally under a prefix
    pub fn is_fetching(&self, prefix: Option<&Key>) -> usize {
        self.cache()
            .entries
            .read()
            .values()
            .filter(|entry| entry.is_fetching())
            .filter(|entry| prefix.map_or(true, |p| p.is_prefix_of(&entry.key)))
            .count()
    }

    pub fn entry_count(&self) -> usize {
        self.cache().len()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache().stats()
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.inner.config)
            .field("entries", &self.entry_count())
            .field("plugins", &self.plugin_names())
            .field("hooks", &self.inner.hooks)
            .finish()
    }
}

/// A live subscriber on one entry; dropping it unsubscribes
pub struct Subscription {
    client: QueryClient,
    key: Key,
    id: SubscriberId,
    attached: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Current state of the subscribed entry
    pub fn entry(&self) -> Option<EntrySummary> {
        self.client.get_entry(&self.key)
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            self.client.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("attached", &self.attached)
            .finish()
    }
}
