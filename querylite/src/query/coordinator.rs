// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution coordinator
//!
//! Runs the fetch function for an entry once per logical request. Concurrent
//! callers join the authoritative in-flight fetch; a cancelling refetch
//! replaces it, and the replaced call's outcome is discarded on arrival.
//! Callers still waiting on a replaced fetch are handed the outcome of its
//! successor.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::entry::InFlight;
use super::QueryStatus;
use crate::client::QueryClient;
use crate::config::QueryOptions;
use crate::error::{FetchError, QueryError, QueryResult};
use crate::hooks::HookEvent;
use crate::key::Key;

/// User fetch function
pub type QueryFn =
    Arc<dyn Fn(FetchContext) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, QueryResult<Value>>>;

/// Slot through which a superseded fetch finds the fetch that replaced it
pub(crate) type Successor = Arc<Mutex<Option<SharedFetch>>>;

/// Box an async closure into a [`QueryFn`]
pub fn query_fn<F, Fut>(f: F) -> QueryFn
where
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Context handed to every fetch invocation
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub key: Key,
    /// Cancelled when this fetch is superseded or its entry is removed
    pub signal: CancellationToken,
    /// 1-based attempt number, advanced by retrying wrappers
    pub attempt: u32,
}

impl FetchContext {
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Supersede an in-flight fetch instead of joining it
    pub cancel_refetch: bool,
    /// Per-query overrides stored on the entry
    pub query: Option<QueryOptions>,
}

impl FetchOptions {
    pub fn refetch() -> Self {
        Self {
            cancel_refetch: true,
            query: None,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.query = Some(options);
        self
    }
}

impl QueryClient {
    /// Fetch `key`, joining an outstanding fetch when there is one
    pub async fn fetch(&self, key: &Key, fetcher: QueryFn) -> QueryResult<Value> {
        self.fetch_with(key, Some(fetcher), FetchOptions::default())
            .await
    }

    /// Fetch with explicit options. Without `fetcher` the entry's stored
    /// function is used.
    pub async fn fetch_with(
        &self,
        key: &Key,
        fetcher: Option<QueryFn>,
        options: FetchOptions,
    ) -> QueryResult<Value> {
        self.start_fetch(key, fetcher, options)?.await
    }

    /// Supersede any in-flight fetch with a new one using the stored function
    pub async fn refetch(&self, key: &Key) -> QueryResult<Value> {
        self.fetch_with(key, None, FetchOptions::refetch()).await
    }

    /// Access path: cached data when fresh, otherwise a (deduplicated) fetch
    pub async fn query(&self, key: &Key, fetcher: QueryFn) -> QueryResult<Value> {
        self.query_with(key, fetcher, QueryOptions::default()).await
    }

    pub async fn query_with(
        &self,
        key: &Key,
        fetcher: QueryFn,
        options: QueryOptions,
    ) -> QueryResult<Value> {
        key.validate()?;
        if let Some(data) = self.fresh_data(key) {
            self.cache().record(|stats| stats.fresh_hits += 1);
            return Ok(data);
        }
        let options = FetchOptions::default().with_options(options);
        self.fetch_with(key, Some(fetcher), options).await
    }

    /// Warm the cache; fetch failures are stored on the entry, not returned
    pub async fn prefetch(&self, key: &Key, fetcher: QueryFn) -> QueryResult<()> {
        match self.query(key, fetcher).await {
            Ok(_) | Err(QueryError::Fetch(_)) | Err(QueryError::Cancelled) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn fresh_data(&self, key: &Key) -> Option<Value> {
        let now = Instant::now();
        let entries = self.cache().entries.read();
        let entry = entries.get(&key.encode())?;
        if entry.status == QueryStatus::Success && !entry.is_stale(now) {
            entry.data.clone()
        } else {
            None
        }
    }

    /// Register or join the authoritative fetch for `key`.
    ///
    /// The returned future resolves after the entry has settled and the
    /// settle hooks have run. With a tokio runtime the fetch is also spawned,
    /// so it completes even if every caller drops its future.
    pub(crate) fn start_fetch(
        &self,
        key: &Key,
        fetcher: Option<QueryFn>,
        options: FetchOptions,
    ) -> QueryResult<SharedFetch> {
        key.validate()?;
        let hash = key.encode();
        let wrapped = fetcher.map(|f| self.wrap_fetch(f));
        let cache = self.cache();

        let (shared, generation) = {
            let mut entries = cache.entries.write();
            let entry = cache.entry_mut(&mut entries, key, &hash);
            if let Some(query) = options.query {
                entry.options = query;
            }
            if let Some(f) = wrapped {
                entry.query_fn = Some(f);
            }

            if let Some(in_flight) = &entry.in_flight {
                if !options.cancel_refetch {
                    log::debug!(
                        "Joining in-flight fetch for {} (generation {})",
                        hash,
                        in_flight.generation
                    );
                    let shared = in_flight.shared.clone();
                    drop(entries);
                    cache.record(|stats| stats.dedup_joins += 1);
                    return Ok(shared);
                }
            }

            let Some(query_fn) = entry.query_fn.clone() else {
                return Err(QueryError::MissingQueryFn(hash));
            };

            let generation = cache.next_generation();
            let token = CancellationToken::new();
            let successor = Successor::default();
            let ctx = FetchContext {
                key: entry.key.clone(),
                signal: token.clone(),
                attempt: 1,
            };
            let shared =
                self.fetch_future(hash.clone(), generation, query_fn, ctx, successor.clone());

            // The successor is recorded before the token fires so the
            // replaced fetch always finds it
            let previous_status = match entry.in_flight.take() {
                Some(superseded) => {
                    log::debug!(
                        "Superseding fetch for {} (generation {})",
                        hash,
                        superseded.generation
                    );
                    *superseded.successor.lock() = Some(shared.clone());
                    superseded.token.cancel();
                    cache.record(|stats| stats.superseded += 1);
                    superseded.previous_status
                }
                None => entry.status,
            };

            entry.generation = generation;
            entry.begin_fetch(InFlight {
                generation,
                token,
                shared: shared.clone(),
                successor,
                previous_status,
            });
            super::cache::QueryCache::disarm_gc(entry);
            (shared, generation)
        };

        cache.record(|stats| stats.fetches_started += 1);
        log::debug!("Starting fetch for {} (generation {})", hash, generation);

        if let Ok(handle) = Handle::try_current() {
            handle.spawn(shared.clone().map(|_| ()));
        }
        Ok(shared)
    }

    /// Build the shared future of one fetch generation.
    ///
    /// `before-fetch` is published on first poll, inside the shared future,
    /// so no joined caller can drive the fetch to settle ahead of it.
    fn fetch_future(
        &self,
        hash: String,
        generation: u64,
        query_fn: QueryFn,
        ctx: FetchContext,
        successor: Successor,
    ) -> SharedFetch {
        let client = self.downgrade();
        let signal = ctx.signal.clone();
        async move {
            if let Some(client) = client.upgrade() {
                client.publish(&HookEvent::BeforeFetch {
                    key: ctx.key.clone(),
                    generation,
                });
            }
            let outcome = tokio::select! {
                biased;
                _ = signal.cancelled() => Err(QueryError::Cancelled),
                result = query_fn(ctx) => match client.upgrade() {
                    Some(client) => client.settle(&hash, generation, result),
                    None => Err(QueryError::Cancelled),
                },
            };
            if matches!(outcome, Err(QueryError::Cancelled)) {
                let next = successor.lock().clone();
                if let Some(next) = next {
                    log::debug!(
                        "Handing callers of {} (generation {}) to its successor",
                        hash,
                        generation
                    );
                    return next.await;
                }
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Wait for the fetch in flight for `key`, following any supersession.
    /// Returns `None` when nothing is in flight.
    pub async fn wait_for_fetch(&self, key: &Key) -> Option<QueryResult<Value>> {
        let shared = self.in_flight_fetch(key)?;
        Some(shared.await)
    }

    fn in_flight_fetch(&self, key: &Key) -> Option<SharedFetch> {
        let entries = self.cache().entries.read();
        let entry = entries.get(&key.encode())?;
        entry.in_flight.as_ref().map(|in_flight| in_flight.shared.clone())
    }

    /// Apply a fetch outcome if `generation` is still authoritative
    fn settle(
        &self,
        hash: &str,
        generation: u64,
        result: Result<Value, FetchError>,
    ) -> QueryResult<Value> {
        let cache = self.cache();
        let (key, status) = {
            let mut entries = cache.entries.write();
            let Some(entry) = entries.get_mut(hash) else {
                log::debug!("Discarding result for removed entry {}", hash);
                return Err(QueryError::Cancelled);
            };
            if entry.in_flight_generation() != Some(generation) {
                log::debug!(
                    "Discarding superseded result for {} (generation {})",
                    hash,
                    generation
                );
                return Err(QueryError::Cancelled);
            }

            match &result {
                Ok(data) => {
                    let stale_time = cache.stale_time_for(entry);
                    entry.settle_success(data.clone(), stale_time, Instant::now());
                }
                Err(err) => entry.settle_error(err.clone()),
            }
            cache.arm_gc(entry);
            (entry.key.clone(), entry.status)
        };

        match &result {
            Ok(data) => {
                cache.record(|stats| stats.successes += 1);
                log::debug!("Fetch for {} succeeded (generation {})", hash, generation);
                self.publish(&HookEvent::Success {
                    key: key.clone(),
                    generation,
                    data: data.clone(),
                });
            }
            Err(err) => {
                cache.record(|stats| stats.failures += 1);
                log::debug!("Fetch for {} failed (generation {}): {}", hash, generation, err);
                self.publish(&HookEvent::Error {
                    key: key.clone(),
                    generation,
                    error: err.clone(),
                });
            }
        }
        self.publish(&HookEvent::Settled {
            key,
            generation,
            status,
        });

        result.map_err(QueryError::Fetch)
    }

    /// Cancel in-flight fetches under `prefix`; entries revert to the status
    /// they had before the fetch began. Returns the number cancelled.
    pub fn cancel_queries(&self, prefix: &Key) -> usize {
        let cache = self.cache();
        let hashes = cache.matching(prefix, false);
        let mut cancelled = 0;
        {
            let mut entries = cache.entries.write();
            for hash in &hashes {
                if let Some(entry) = entries.get_mut(hash) {
                    if entry.cancel_in_flight() {
                        cache.arm_gc(entry);
                        cancelled += 1;
                    }
                }
            }
        }
        if cancelled > 0 {
            cache.record(|stats| stats.cancelled += cancelled as u64);
            log::debug!("Cancelled {} fetches under {}", cancelled, prefix);
        }
        cancelled
    }
}
