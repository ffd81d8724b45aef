// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Hook bus: ordered lifecycle callbacks
//!
//! Plugins and applications register callbacks against named extension
//! points. The engine publishes events synchronously; callbacks run in
//! registration order and a failing callback (an `Err` or a panic) is
//! isolated so that its siblings and the triggering operation continue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::client::QueryClient;
use crate::error::{FetchError, QueryError};
use crate::key::Key;
use crate::mutation::{MutationInfo, MutationStatus};
use crate::query::QueryStatus;

/// Named extension points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPoint {
    BeforeFetch,
    OnSuccess,
    OnError,
    OnSettled,
    OnMutationSuccess,
    OnMutationError,
    OnMutationSettled,
}

impl HookPoint {
    pub const ALL: [HookPoint; 7] = [
        HookPoint::BeforeFetch,
        HookPoint::OnSuccess,
        HookPoint::OnError,
        HookPoint::OnSettled,
        HookPoint::OnMutationSuccess,
        HookPoint::OnMutationError,
        HookPoint::OnMutationSettled,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HookPoint::BeforeFetch => "before-fetch",
            HookPoint::OnSuccess => "on-success",
            HookPoint::OnError => "on-error",
            HookPoint::OnSettled => "on-settled",
            HookPoint::OnMutationSuccess => "on-mutation-success",
            HookPoint::OnMutationError => "on-mutation-error",
            HookPoint::OnMutationSettled => "on-mutation-settled",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            HookPoint::OnMutationSuccess | HookPoint::OnMutationError | HookPoint::OnMutationSettled
        )
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Payload delivered to callbacks
#[derive(Debug, Clone)]
pub enum HookEvent {
    BeforeFetch {
        key: Key,
        generation: u64,
    },
    Success {
        key: Key,
        generation: u64,
        data: Value,
    },
    Error {
        key: Key,
        generation: u64,
        error: FetchError,
    },
    Settled {
        key: Key,
        generation: u64,
        status: QueryStatus,
    },
    MutationSuccess {
        mutation: MutationInfo,
        variables: Value,
        data: Value,
    },
    MutationError {
        mutation: MutationInfo,
        variables: Value,
        error: FetchError,
    },
    MutationSettled {
        mutation: MutationInfo,
        variables: Value,
        status: MutationStatus,
    },
}

impl HookEvent {
    pub fn point(&self) -> HookPoint {
        match self {
            HookEvent::BeforeFetch { .. } => HookPoint::BeforeFetch,
            HookEvent::Success { .. } => HookPoint::OnSuccess,
            HookEvent::Error { .. } => HookPoint::OnError,
            HookEvent::Settled { .. } => HookPoint::OnSettled,
            HookEvent::MutationSuccess { .. } => HookPoint::OnMutationSuccess,
            HookEvent::MutationError { .. } => HookPoint::OnMutationError,
            HookEvent::MutationSettled { .. } => HookPoint::OnMutationSettled,
        }
    }

    /// Query key for query-level events
    pub fn key(&self) -> Option<&Key> {
        match self {
            HookEvent::BeforeFetch { key, .. }
            | HookEvent::Success { key, .. }
            | HookEvent::Error { key, .. }
            | HookEvent::Settled { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Mutation identity for mutation-level events
    pub fn mutation(&self) -> Option<&MutationInfo> {
        match self {
            HookEvent::MutationSuccess { mutation, .. }
            | HookEvent::MutationError { mutation, .. }
            | HookEvent::MutationSettled { mutation, .. } => Some(mutation),
            _ => None,
        }
    }
}

pub type HookOutcome = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub type HookCallback = Arc<dyn Fn(&QueryClient, &HookEvent) -> HookOutcome + Send + Sync>;

struct Registration {
    owner: String,
    callback: HookCallback,
}

/// Ordered callback registry, frozen once the client is built
#[derive(Default)]
pub struct HookBus {
    callbacks: HashMap<HookPoint, Vec<Registration>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, owner: &str, point: HookPoint, callback: HookCallback) {
        log::debug!("Registering {} callback for '{}'", point, owner);
        self.callbacks.entry(point).or_default().push(Registration {
            owner: owner.to_string(),
            callback,
        });
    }

    /// Number of callbacks registered at a point
    pub fn callback_count(&self, point: HookPoint) -> usize {
        self.callbacks.get(&point).map_or(0, Vec::len)
    }

    /// Invoke every callback registered for the event's point, in order.
    ///
    /// Returns the isolated failures; they have already been logged.
    pub fn publish(&self, client: &QueryClient, event: &HookEvent) -> Vec<QueryError> {
        let point = event.point();
        let Some(registrations) = self.callbacks.get(&point) else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        for registration in registrations {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (registration.callback)(client, event)));

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => format!("callback panicked: {}", panic_message(&payload)),
            };

            log::warn!(
                "Hook callback from '{}' failed during {}: {}",
                registration.owner,
                point,
                message
            );
            failures.push(QueryError::PluginCallback {
                plugin: registration.owner.clone(),
                point,
                message,
            });
        }
        failures
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for point in HookPoint::ALL {
            let owners: Vec<&str> = self
                .callbacks
                .get(&point)
                .map(|regs| regs.iter().map(|r| r.owner.as_str()).collect())
                .unwrap_or_default();
            if !owners.is_empty() {
                map.entry(&point.name(), &owners);
            }
        }
        map.finish()
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Registration handle given to a plugin while the client is built
pub struct HookRegistrar<'a> {
    bus: &'a mut HookBus,
    owner: String,
}

impl<'a> HookRegistrar<'a> {
    pub fn new(bus: &'a mut HookBus, owner: &str) -> Self {
        Self {
            bus,
            owner: owner.to_string(),
        }
    }

    pub fn on<F>(&mut self, point: HookPoint, callback: F) -> &mut Self
    where
        F: Fn(&QueryClient, &HookEvent) -> HookOutcome + Send + Sync + 'static,
    {
        self.bus.register(&self.owner, point, Arc::new(callback));
        self
    }

    /// Register the same callback on several points
    pub fn on_each<F>(&mut self, points: &[HookPoint], callback: F) -> &mut Self
    where
        F: Fn(&QueryClient, &HookEvent) -> HookOutcome + Send + Sync + 'static,
    {
        let callback: HookCallback = Arc::new(callback);
        for point in points {
            self.bus.register(&self.owner, *point, callback.clone());
        }
        self
    }
}
