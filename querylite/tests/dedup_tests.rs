//! Tests for fetch deduplication
//!
//! Concurrent requests for one key while a fetch is outstanding must share a
//! single invocation of the fetch function and observe the same outcome.

#[path = "testutils/mod.rs"]
mod testutils;

use querylite::{key, FetchError, QueryError, QueryStatus};
use serde_json::json;
use std::time::Duration;
use testutils::fetchers::{CountingFetcher, GatedFetcher};
use testutils::test_client;

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_invocation() {
    let client = test_client();
    let fetcher = CountingFetcher::new(json!([{"id": 1}])).with_delay(Duration::from_millis(50));
    let key = key!["users"];

    let results = futures::future::join_all(
        (0..10).map(|_| client.fetch(&key, fetcher.query_fn())),
    )
    .await;

    assert_eq!(fetcher.calls(), 1);
    for result in results {
        assert_eq!(result.unwrap(), json!([{"id": 1}]));
    }
    let stats = client.stats();
    assert_eq!(stats.fetches_started, 1);
    assert_eq!(stats.dedup_joins, 9);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_the_error() {
    let client = test_client();
    let fetcher = CountingFetcher::failing("upstream down").with_delay(Duration::from_millis(50));
    let key = key!["users"];

    let (a, b) = tokio::join!(
        client.fetch(&key, fetcher.query_fn()),
        client.fetch(&key, fetcher.query_fn())
    );

    assert_eq!(fetcher.calls(), 1);
    let expected = QueryError::Fetch(FetchError::new("upstream down"));
    assert_eq!(a.unwrap_err(), expected);
    assert_eq!(b.unwrap_err(), expected);

    let entry = client.get_entry(&key).expect("entry should exist");
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.failure_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dedup_across_tasks() {
    let client = test_client();
    let gate = GatedFetcher::new();
    let key = key!["documents", 1];

    let first = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;

    let joiners: Vec<_> = (0..8)
        .map(|_| {
            let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
            tokio::spawn(async move { client.fetch(&key, fetch).await })
        })
        .collect();
    testutils::fetchers::wait_until(|| client.stats().dedup_joins == 8).await;

    assert!(gate.resolve(0, Ok(json!({"title": "Doc"}))));
    assert_eq!(
        first.await.expect("task panicked").unwrap(),
        json!({"title": "Doc"})
    );
    for joiner in joiners {
        assert_eq!(
            joiner.await.expect("task panicked").unwrap(),
            json!({"title": "Doc"})
        );
    }
    assert_eq!(gate.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_fetches_are_not_deduplicated() {
    let client = test_client();
    let fetcher = CountingFetcher::scripted(vec![Ok(json!(1)), Ok(json!(2))]);
    let key = key!["counter"];

    assert_eq!(client.fetch(&key, fetcher.query_fn()).await.unwrap(), json!(1));
    assert_eq!(client.fetch(&key, fetcher.query_fn()).await.unwrap(), json!(2));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_different_keys_fetch_independently() {
    let client = test_client();
    let fetcher = CountingFetcher::new(json!("x"));

    let key_a = key!["a"];
    let key_b = key!["b"];
    let (a, b) = tokio::join!(
        client.fetch(&key_a, fetcher.query_fn()),
        client.fetch(&key_b, fetcher.query_fn())
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_invalid_key_aborts_before_any_state_change() {
    let client = test_client();
    let fetcher = CountingFetcher::new(json!("x"));

    let err = client
        .fetch(&querylite::Key::new(), fetcher.query_fn())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidKey(_)));
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(client.entry_count(), 0);
}
