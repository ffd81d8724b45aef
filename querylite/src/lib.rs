// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! QueryLite - An asynchronous query cache
//!
//! QueryLite caches the results of asynchronous fetch functions under
//! structured keys and keeps them consistent while many consumers read them.
//!
//! # Features
//!
//! - **Structured Keys**: Keys are segment lists with canonical encoding and prefix matching
//! - **Deduplication**: Concurrent requests for one key share a single fetch
//! - **Last-Issued Wins**: Superseded fetches never overwrite newer state
//! - **Stale-While-Revalidate**: Data survives errors and refetches
//! - **Garbage Collection**: Entries without subscribers are evicted after a delay
//! - **Hook Bus**: Ordered, isolated lifecycle callbacks for plugins
//! - **Mutations**: Writes that invalidate affected queries on success
//! - **Plugins**: Retry, delay, timeout, persistence and inspection
//!
//! # Usage
//!
//! ```ignore
//! use querylite::{key, query_fn, QueryClient};
//! use serde_json::json;
//!
//! let client = QueryClient::new();
//! let users = client
//!     .query(&key!["users"], query_fn(|_ctx| async { Ok(json!([{"id": 1}])) }))
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod key;
pub mod mutation;
pub mod plugins;
pub mod query;

pub use client::{
    InvalidateOptions, InvalidationResult, QueryClient, QueryClientBuilder, Subscription,
};
pub use config::{ClientConfig, QueryOptions};
pub use error::{FetchError, QueryError, QueryResult};
pub use hooks::{HookBus, HookEvent, HookOutcome, HookPoint, HookRegistrar};
pub use key::{is_prefix, Key, KeySegment, Primitive};
pub use mutation::{
    mutation_fn, Mutation, MutationContext, MutationFn, MutationInfo, MutationState,
    MutationStatus,
};
pub use plugins::Plugin;
pub use query::{
    query_fn, CacheStats, EntrySummary, FetchContext, FetchOptions, QueryFn, QueryStatus,
    SubscriberId, SubscriberInfo,
};

/// QueryLite version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// QueryLite crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
