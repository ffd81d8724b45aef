//! Fetch functions with observable behaviour

use parking_lot::Mutex;
use querylite::{query_fn, FetchContext, FetchError, QueryFn};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Returns scripted responses in order, repeating the last one, after an
/// optional delay
#[derive(Clone)]
pub struct CountingFetcher {
    calls: Arc<AtomicUsize>,
    attempts: Arc<Mutex<Vec<u32>>>,
    responses: Arc<Mutex<VecDeque<Result<Value, FetchError>>>>,
    last: Arc<Mutex<Result<Value, FetchError>>>,
    delay: Duration,
}

impl CountingFetcher {
    pub fn new(value: Value) -> Self {
        Self::scripted(vec![Ok(value)])
    }

    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![Err(FetchError::new(message))])
    }

    pub fn scripted(responses: Vec<Result<Value, FetchError>>) -> Self {
        let last = responses
            .last()
            .cloned()
            .unwrap_or_else(|| Ok(Value::Null));
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(responses.into())),
            last: Arc::new(Mutex::new(last)),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `FetchContext::attempt` of every invocation
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }

    fn next_response(&self) -> Result<Value, FetchError> {
        match self.responses.lock().pop_front() {
            Some(response) => {
                *self.last.lock() = response.clone();
                response
            }
            None => self.last.lock().clone(),
        }
    }

    pub fn query_fn(&self) -> QueryFn {
        let fetcher = self.clone();
        query_fn(move |ctx: FetchContext| {
            let fetcher = fetcher.clone();
            async move {
                fetcher.calls.fetch_add(1, Ordering::SeqCst);
                fetcher.attempts.lock().push(ctx.attempt);
                let response = fetcher.next_response();
                if !fetcher.delay.is_zero() {
                    tokio::time::sleep(fetcher.delay).await;
                }
                response
            }
        })
    }
}

struct GateCall {
    sender: Option<oneshot::Sender<Result<Value, FetchError>>>,
    signal: CancellationToken,
}

/// Every invocation waits until the test resolves it by index
#[derive(Clone, Default)]
pub struct GatedFetcher {
    calls: Arc<Mutex<Vec<GateCall>>>,
}

impl GatedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn query_fn(&self) -> QueryFn {
        let calls = self.calls.clone();
        query_fn(move |ctx: FetchContext| {
            let (sender, receiver) = oneshot::channel();
            calls.lock().push(GateCall {
                sender: Some(sender),
                signal: ctx.signal.clone(),
            });
            async move {
                receiver
                    .await
                    .unwrap_or_else(|_| Err(FetchError::new("gate dropped")))
            }
        })
    }

    /// Resolve invocation `index`; returns false if nobody is waiting anymore
    pub fn resolve(&self, index: usize, result: Result<Value, FetchError>) -> bool {
        let sender = self
            .calls
            .lock()
            .get_mut(index)
            .and_then(|call| call.sender.take());
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    pub fn signal(&self, index: usize) -> CancellationToken {
        self.calls.lock()[index].signal.clone()
    }

    /// Yield to the runtime until `count` invocations have started
    pub async fn wait_for_calls(&self, count: usize) {
        for _ in 0..10_000 {
            if self.calls() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} fetch invocations, saw {}", count, self.calls());
    }
}

/// Yield until `condition` holds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
