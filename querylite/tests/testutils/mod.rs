//! Test utilities for QueryLite integration tests
//!
//! - `fetchers`: fetch functions that count invocations or wait to be
//!   resolved by the test
//! - `init_logging` / `test_client`: shared client fixtures

#![allow(dead_code)]

pub mod fetchers;

use querylite::{ClientConfig, Plugin, QueryClient};
use std::time::Duration;

/// Route `log` output through the test harness; safe to call repeatedly
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Client with test timers: 1 minute GC, immediately stale data
pub fn test_client() -> QueryClient {
    init_logging();
    QueryClient::with_config(ClientConfig::default().with_gc_time(Duration::from_secs(60)))
        .expect("Failed to build test client")
}

/// Client with a single plugin and default config
pub fn client_with_plugin<P: Plugin + 'static>(plugin: P) -> QueryClient {
    init_logging();
    QueryClient::builder()
        .plugin(plugin)
        .build()
        .expect("Failed to build test client")
}
