//! Tests for superseding and cancelling in-flight fetches
//!
//! The last issued fetch for an entry is authoritative. Results of fetches it
//! replaced are discarded and never touch the entry; callers of a replaced
//! fetch receive the authoritative outcome instead.

#[path = "testutils/mod.rs"]
mod testutils;

use parking_lot::Mutex;
use querylite::{
    key, FetchError, FetchOptions, HookEvent, HookPoint, InvalidateOptions, KeySegment,
    QueryClient, QueryError, QueryStatus,
};
use serde_json::json;
use std::sync::Arc;
use testutils::fetchers::{wait_until, GatedFetcher};
use testutils::test_client;

#[tokio::test]
async fn test_superseded_result_is_discarded() {
    let client = test_client();
    let gate = GatedFetcher::new();
    let key = key!["users"];

    let first = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;

    let second = {
        let (client, key) = (client.clone(), key.clone());
        tokio::spawn(async move { client.refetch(&key).await })
    };
    gate.wait_for_calls(2).await;
    assert!(gate.signal(0).is_cancelled());
    assert!(!gate.signal(1).is_cancelled());

    assert!(gate.resolve(1, Ok(json!(["new"]))));
    assert_eq!(second.await.expect("task panicked").unwrap(), json!(["new"]));

    // The superseded caller sees the replacing fetch's data
    assert_eq!(first.await.expect("task panicked").unwrap(), json!(["new"]));

    // The superseded call resolving late changes nothing
    gate.resolve(0, Ok(json!(["old"])));

    let entry = client.get_entry(&key).expect("entry should exist");
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data, Some(json!(["new"])));
    assert_eq!(client.stats().superseded, 1);
}

#[tokio::test]
async fn test_out_of_order_resolution_keeps_last_issued() {
    let client = test_client();
    let gate = GatedFetcher::new();
    let key = key!["search", KeySegment::map([("q", "rust")])];

    let first = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;
    let second = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move {
            client
                .fetch_with(&key, Some(fetch), FetchOptions::refetch())
                .await
        })
    };
    gate.wait_for_calls(2).await;

    // Later call settles first, earlier one afterwards
    gate.resolve(1, Err(FetchError::new("later failed")));
    let _ = second.await;
    gate.resolve(0, Ok(json!("earlier")));
    let _ = first.await;

    let entry = client.get_entry(&key).expect("entry should exist");
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.error, Some(FetchError::new("later failed")));
    assert!(entry.data.is_none());
}

#[tokio::test]
async fn test_superseded_fetch_fires_no_settle_hooks() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let client = QueryClient::builder()
        .on(HookPoint::OnSettled, move |_client, event| {
            if let HookEvent::Settled { generation, .. } = event {
                recorded.lock().push(*generation);
            }
            Ok(())
        })
        .build()
        .expect("Failed to build client");
    let gate = GatedFetcher::new();
    let key = key!["users"];

    let first = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;
    let second = {
        let (client, key) = (client.clone(), key.clone());
        tokio::spawn(async move { client.refetch(&key).await })
    };
    gate.wait_for_calls(2).await;

    gate.resolve(0, Ok(json!(0)));
    gate.resolve(1, Ok(json!(1)));
    let _ = first.await;
    let _ = second.await;

    assert_eq!(events.lock().len(), 1);
}

#[tokio::test]
async fn test_reader_receives_outcome_of_invalidation_refetch() {
    let client = test_client();
    let gate = GatedFetcher::new();
    let key = key!["users"];
    let _list = client
        .subscribe(&key, Some("UserList"))
        .expect("subscribe failed");

    let reader = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;

    let result = client
        .invalidate(&key!["users"], InvalidateOptions::default())
        .expect("invalidate failed");
    assert_eq!(result.refetched, 1);
    gate.wait_for_calls(2).await;
    assert!(gate.signal(0).is_cancelled());

    gate.resolve(1, Ok(json!(1)));
    assert_eq!(reader.await.expect("task panicked").unwrap(), json!(1));
    assert_eq!(client.get_query_data(&key), Some(json!(1)));
}

#[tokio::test]
async fn test_chained_supersession_resolves_to_last_fetch() {
    let client = test_client();
    let gate = GatedFetcher::new();
    let key = key!["feed"];

    let first = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;
    let second = {
        let (client, key) = (client.clone(), key.clone());
        tokio::spawn(async move { client.refetch(&key).await })
    };
    gate.wait_for_calls(2).await;
    let third = {
        let (client, key) = (client.clone(), key.clone());
        tokio::spawn(async move { client.refetch(&key).await })
    };
    gate.wait_for_calls(3).await;

    gate.resolve(2, Err(FetchError::new("feed unavailable")));
    for task in [first, second, third] {
        let err = task.await.expect("task panicked").unwrap_err();
        assert!(matches!(err, QueryError::Fetch(ref e) if e.message == "feed unavailable"));
    }
    assert_eq!(client.stats().superseded, 2);
}

#[tokio::test]
async fn test_cancel_queries_reverts_status() {
    let client = test_client();
    let gate = GatedFetcher::new();
    let key = key!["documents", "1"];
    client
        .set_query_data(&key, json!({"title": "cached"}))
        .expect("set_query_data failed");

    let pending = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;
    assert_eq!(client.get_entry(&key).unwrap().status, QueryStatus::Pending);
    assert_eq!(client.is_fetching(Some(&key!["documents"])), 1);

    assert_eq!(client.cancel_queries(&key!["documents"]), 1);
    assert!(gate.signal(0).is_cancelled());
    assert!(matches!(
        pending.await.expect("task panicked"),
        Err(QueryError::Cancelled)
    ));

    let entry = client.get_entry(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data, Some(json!({"title": "cached"})));
    assert!(!entry.is_fetching);
    assert_eq!(client.is_fetching(None), 0);
}

#[tokio::test]
async fn test_removed_entry_discards_result() {
    let client = test_client();
    let gate = GatedFetcher::new();
    let key = key!["ephemeral"];

    let pending = {
        let (client, key, fetch) = (client.clone(), key.clone(), gate.query_fn());
        tokio::spawn(async move { client.fetch(&key, fetch).await })
    };
    gate.wait_for_calls(1).await;
    assert!(client.remove(&key));
    assert!(gate.signal(0).is_cancelled());

    assert!(matches!(
        pending.await.expect("task panicked"),
        Err(QueryError::Cancelled)
    ));
    wait_until(|| client.get_entry(&key).is_none()).await;
}
