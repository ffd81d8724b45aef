// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Timeout plugin: fail a fetch that runs past a deadline

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

use super::Plugin;
use crate::error::FetchError;
use crate::query::{FetchContext, QueryFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPlugin {
    pub timeout: Duration,
}

impl TimeoutPlugin {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Plugin for TimeoutPlugin {
    fn name(&self) -> &str {
        "timeout"
    }

    fn wrap_fetch(&self, next: QueryFn) -> QueryFn {
        let timeout = self.timeout;
        Arc::new(move |ctx: FetchContext| {
            let next = next.clone();
            async move {
                let key = ctx.key.clone();
                match tokio::time::timeout(timeout, next(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        log::debug!("Fetch for {} timed out after {:?}", key, timeout);
                        Err(FetchError::timeout(timeout))
                    }
                }
            }
            .boxed()
        })
    }
}
