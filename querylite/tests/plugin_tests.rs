//! Tests for the fetch-wrapping plugins: retry, delay and timeout

#[path = "testutils/mod.rs"]
mod testutils;

use querylite::plugins::{BackoffStrategy, DelayPlugin, RetryPlugin, RetryPolicy, TimeoutPlugin};
use querylite::{key, FetchError, QueryClient, QueryError, QueryStatus};
use serde_json::json;
use std::time::Duration;
use testutils::client_with_plugin;
use testutils::fetchers::{wait_until, CountingFetcher};

fn fixed_retry(attempts: u32, delay_ms: u64) -> RetryPlugin {
    RetryPlugin::new(
        RetryPolicy::new(attempts)
            .with_backoff(BackoffStrategy::Fixed(Duration::from_millis(delay_ms))),
    )
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_transient_failures() {
    let client = client_with_plugin(fixed_retry(3, 100));
    let fetcher = CountingFetcher::scripted(vec![
        Err(FetchError::new("503")),
        Err(FetchError::new("503")),
        Ok(json!("finally")),
    ]);
    let key = key!["flaky"];

    let value = client.fetch(&key, fetcher.query_fn()).await.unwrap();
    assert_eq!(value, json!("finally"));
    assert_eq!(fetcher.attempts(), vec![1, 2, 3]);

    // Retries are invisible to the entry: one fetch, one settle
    let entry = client.get_entry(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.fetch_count, 1);
    assert_eq!(entry.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_max_attempts() {
    let client = client_with_plugin(fixed_retry(2, 10));
    let fetcher = CountingFetcher::failing("down");

    let err = client
        .fetch(&key!["down"], fetcher.query_fn())
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::Fetch(FetchError::new("down")));
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(client.get_entry(&key!["down"]).unwrap().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_predicate_skips_permanent_errors() {
    let plugin = RetryPlugin::new(
        RetryPolicy::new(5)
            .with_backoff(BackoffStrategy::None)
            .retry_if(|err, _attempt| err.code.as_deref() != Some("http_404")),
    );
    let client = client_with_plugin(plugin);
    let fetcher = CountingFetcher::scripted(vec![Err(FetchError::new("missing").with_code("http_404"))]);

    assert!(client.fetch(&key!["gone"], fetcher.query_fn()).await.is_err());
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_when_cancelled() {
    let client = client_with_plugin(fixed_retry(5, 10_000));
    let fetcher = CountingFetcher::failing("down");
    let key = key!["cancel-me"];

    let pending = {
        let (client, key, fetch) = (client.clone(), key.clone(), fetcher.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    wait_until(|| fetcher.calls() == 1).await;
    assert_eq!(client.cancel_queries(&key), 1);

    assert!(matches!(pending.await.unwrap(), Err(QueryError::Cancelled)));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_installed_plugin_is_outermost() {
    // retry wraps delay, so every attempt is held for the minimum duration
    let client = QueryClient::builder()
        .plugin(fixed_retry(2, 0))
        .plugin(DelayPlugin::new(Duration::from_millis(100)))
        .build()
        .unwrap();
    let fetcher = CountingFetcher::scripted(vec![Err(FetchError::new("once")), Ok(json!(1))]);

    let started = tokio::time::Instant::now();
    client.fetch(&key!["k"], fetcher.query_fn()).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(client.plugin_names(), vec!["retry", "delay"]);
}

#[tokio::test(start_paused = true)]
async fn test_delay_keeps_entry_pending_for_min_duration() {
    let client = client_with_plugin(DelayPlugin::new(Duration::from_millis(300)));
    let fetcher = CountingFetcher::new(json!("fast"));
    let key = key!["fast"];

    let pending = {
        let (client, key, fetch) = (client.clone(), key.clone(), fetcher.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(client.get_entry(&key).unwrap().status, QueryStatus::Pending);

    pending.await.unwrap().unwrap();
    assert_eq!(client.get_entry(&key).unwrap().status, QueryStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_settles_entry_into_error() {
    let client = client_with_plugin(TimeoutPlugin::new(Duration::from_secs(1)));
    let fetcher = CountingFetcher::new(json!("late")).with_delay(Duration::from_secs(30));
    let key = key!["slow"];

    let err = client.fetch(&key, fetcher.query_fn()).await.unwrap_err();
    assert!(err.fetch_error().is_some_and(FetchError::is_timeout));

    let entry = client.get_entry(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Error);
    assert!(entry.error.is_some_and(|e| e.is_timeout()));
}
