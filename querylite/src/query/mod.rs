// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query entries, the cache registry and the execution coordinator

mod cache;
mod coordinator;
mod entry;

pub use cache::CacheStats;
pub(crate) use cache::QueryCache;
pub use coordinator::{query_fn, FetchContext, FetchOptions, QueryFn};
pub use entry::{EntrySummary, QueryStatus, SubscriberId, SubscriberInfo};
