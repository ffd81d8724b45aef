// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Mutation runner
//!
//! A mutation is not registered in the cache. It tracks the status of its
//! latest run locally and reports outcomes through the hook bus, where
//! plugins such as auto-invalidate react to them.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::client::QueryClient;
use crate::error::{FetchError, QueryError, QueryResult};
use crate::hooks::HookEvent;

/// Identity of a mutation as seen by hook callbacks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationInfo {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationStatus::Idle => "idle",
            MutationStatus::Pending => "pending",
            MutationStatus::Success => "success",
            MutationStatus::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Local state of the latest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationState {
    pub status: MutationStatus,
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub variables: Option<Value>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Default for MutationState {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
            variables: None,
            submitted_at: None,
        }
    }
}

/// Context passed to the mutation function
#[derive(Debug, Clone)]
pub struct MutationContext {
    pub mutation: MutationInfo,
    /// For optimistic writes through `set_query_data`
    pub client: QueryClient,
}

pub type MutationFn = Arc<
    dyn Fn(Value, MutationContext) -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync,
>;

/// Box an async closure into a [`MutationFn`]
pub fn mutation_fn<F, Fut>(f: F) -> MutationFn
where
    F: Fn(Value, MutationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    Arc::new(move |variables, ctx| f(variables, ctx).boxed())
}

/// A named write operation. Clones share state.
#[derive(Clone)]
pub struct Mutation {
    info: MutationInfo,
    mutation_fn: MutationFn,
    state: Arc<Mutex<MutationState>>,
    runs: Arc<AtomicU64>,
}

impl Mutation {
    pub fn new<F, Fut>(name: &str, f: F) -> Self
    where
        F: Fn(Value, MutationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        Self::from_fn(name, mutation_fn(f))
    }

    pub fn from_fn(name: &str, mutation_fn: MutationFn) -> Self {
        Self {
            info: MutationInfo {
                id: Uuid::new_v4(),
                name: name.to_string(),
            },
            mutation_fn,
            state: Arc::new(Mutex::new(MutationState::default())),
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn info(&self) -> &MutationInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn state(&self) -> MutationState {
        self.state.lock().clone()
    }

    pub fn status(&self) -> MutationStatus {
        self.state.lock().status
    }

    /// Back to `Idle`; results of runs still outstanding are not recorded
    pub fn reset(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = MutationState::default();
    }

    /// Execute the mutation.
    ///
    /// Hooks for this run (and any invalidation they trigger) complete before
    /// the result is returned. Only the latest run updates the local state.
    pub async fn run(&self, client: &QueryClient, variables: Value) -> QueryResult<Value> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.lock() = MutationState {
            status: MutationStatus::Pending,
            variables: Some(variables.clone()),
            submitted_at: Some(Utc::now()),
            ..MutationState::default()
        };
        client.cache().record(|stats| stats.mutations_run += 1);
        log::debug!("Running mutation '{}' ({})", self.info.name, self.info.id);

        let ctx = MutationContext {
            mutation: self.info.clone(),
            client: client.clone(),
        };
        let result = (self.mutation_fn)(variables.clone(), ctx).await;
        let status = match result {
            Ok(_) => MutationStatus::Success,
            Err(_) => MutationStatus::Error,
        };

        {
            let mut state = self.state.lock();
            if self.runs.load(Ordering::SeqCst) == run {
                state.status = status;
                match &result {
                    Ok(data) => state.data = Some(data.clone()),
                    Err(err) => state.error = Some(err.clone()),
                }
            }
        }

        match &result {
            Ok(data) => {
                log::debug!("Mutation '{}' succeeded", self.info.name);
                client.publish(&HookEvent::MutationSuccess {
                    mutation: self.info.clone(),
                    variables: variables.clone(),
                    data: data.clone(),
                });
            }
            Err(err) => {
                log::debug!("Mutation '{}' failed: {}", self.info.name, err);
                client.publish(&HookEvent::MutationError {
                    mutation: self.info.clone(),
                    variables: variables.clone(),
                    error: err.clone(),
                });
            }
        }
        client.publish(&HookEvent::MutationSettled {
            mutation: self.info.clone(),
            variables,
            status,
        });

        result.map_err(QueryError::Fetch)
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("info", &self.info)
            .field("status", &self.status())
            .finish()
    }
}
