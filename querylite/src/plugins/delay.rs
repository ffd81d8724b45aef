// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Delay plugin
//!
//! Holds a fetch pending for at least `min_duration`, so a fast response
//! does not make the entry flicker from pending to success. An optional
//! `start_delay` postpones the call itself.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

use super::Plugin;
use crate::error::FetchError;
use crate::query::{FetchContext, QueryFn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelayPlugin {
    pub min_duration: Duration,
    pub start_delay: Duration,
}

impl DelayPlugin {
    pub fn new(min_duration: Duration) -> Self {
        Self {
            min_duration,
            start_delay: Duration::ZERO,
        }
    }

    pub fn with_start_delay(mut self, start_delay: Duration) -> Self {
        self.start_delay = start_delay;
        self
    }
}

impl Plugin for DelayPlugin {
    fn name(&self) -> &str {
        "delay"
    }

    fn wrap_fetch(&self, next: QueryFn) -> QueryFn {
        let DelayPlugin {
            min_duration,
            start_delay,
        } = self.clone();

        Arc::new(move |ctx: FetchContext| {
            let next = next.clone();
            async move {
                if !start_delay.is_zero() {
                    tokio::select! {
                        _ = ctx.signal.cancelled() => {
                            return Err(FetchError::new("fetch cancelled before start").with_code("cancelled"));
                        }
                        _ = tokio::time::sleep(start_delay) => {}
                    }
                }
                let floor = tokio::time::Instant::now() + min_duration;
                let result = next(ctx).await;
                tokio::time::sleep_until(floor).await;
                result
            }
            .boxed()
        })
    }
}
