// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Retry plugin: re-run a failed fetch with backoff

use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::Plugin;
use crate::error::FetchError;
use crate::query::{FetchContext, QueryFn};

/// Delay between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    None,
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

pub type RetryPredicate = Arc<dyn Fn(&FetchError, u32) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Random extra delay up to this fraction of the backoff
    pub jitter: f64,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::default(),
            jitter: 0.0,
            predicate: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Only retry errors for which `predicate(error, attempt)` holds
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FetchError, u32) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(error, attempt))
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay_for_attempt(attempt);
        if self.jitter > 0.0 && !delay.is_zero() {
            delay + delay.mul_f64(self.jitter * fastrand::f64())
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPlugin {
    policy: RetryPolicy,
}

impl RetryPlugin {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Plugin for RetryPlugin {
    fn name(&self) -> &str {
        "retry"
    }

    fn wrap_fetch(&self, next: QueryFn) -> QueryFn {
        let policy = self.policy.clone();
        Arc::new(move |ctx: FetchContext| {
            let next = next.clone();
            let policy = policy.clone();
            async move {
                let mut ctx = ctx;
                loop {
                    let error = match next(ctx.clone()).await {
                        Ok(value) => return Ok(value),
                        Err(error) => error,
                    };
                    if ctx.is_cancelled() || !policy.should_retry(&error, ctx.attempt) {
                        return Err(error);
                    }

                    let delay = policy.delay_for_attempt(ctx.attempt);
                    log::debug!(
                        "Retrying {} after attempt {} failed ({}); waiting {:?}",
                        ctx.key,
                        ctx.attempt,
                        error,
                        delay
                    );
                    tokio::select! {
                        _ = ctx.signal.cancelled() => return Err(error),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    ctx = ctx.next_attempt();
                }
            }
            .boxed()
        })
    }
}
