// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Plugins
//!
//! A plugin contributes hook callbacks, wraps the fetch step, or both.
//! Plugins are installed in order on the client builder; the first
//! installed plugin is the outermost fetch wrapper.

pub mod auto_invalidate;
pub mod delay;
pub mod inspector;
pub mod persister;
pub mod retry;
pub mod timeout;

pub use auto_invalidate::{AutoInvalidatePlugin, InvalidationRule};
pub use delay::DelayPlugin;
pub use inspector::{InspectionReport, InspectorPlugin, RecordedEvent};
pub use persister::{
    CachePersister, FileStorage, MemoryStorage, PersistError, PersistStorage, PersistedCache,
};
#[cfg(feature = "sled-backend")]
pub use persister::SledStorage;
pub use retry::{BackoffStrategy, RetryPlugin, RetryPolicy};
pub use timeout::TimeoutPlugin;

use crate::hooks::HookRegistrar;
use crate::query::QueryFn;

pub trait Plugin: Send + Sync {
    /// Name used in logs and callback failure reports
    fn name(&self) -> &str;

    /// Register hook callbacks; called once while the client is built
    fn register(&self, _hooks: &mut HookRegistrar<'_>) {}

    /// Decorate the fetch step. The default passes it through unchanged.
    fn wrap_fetch(&self, next: QueryFn) -> QueryFn {
        next
    }
}
