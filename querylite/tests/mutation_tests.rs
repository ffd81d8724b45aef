//! Tests for the mutation runner and auto-invalidation

#[path = "testutils/mod.rs"]
mod testutils;

use parking_lot::Mutex;
use querylite::plugins::AutoInvalidatePlugin;
use querylite::{
    key, FetchError, HookEvent, HookPoint, Mutation, MutationStatus, QueryClient, QueryStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use testutils::client_with_plugin;
use testutils::fetchers::CountingFetcher;

fn add_user() -> Mutation {
    Mutation::new("add-user", |variables: Value, _ctx| async move {
        Ok(json!({"id": 2, "name": variables["name"].clone()}))
    })
}

#[tokio::test(start_paused = true)]
async fn test_success_invalidates_before_run_returns() {
    let client = client_with_plugin(
        AutoInvalidatePlugin::new().on_mutation("add-user", [querylite::key!["users"]]),
    );
    let fetcher = CountingFetcher::scripted(vec![
        Ok(json!([{"id": 1}])),
        Ok(json!([{"id": 1}, {"id": 2}])),
    ])
    .with_delay(Duration::from_millis(10));
    let users = key!["users"];
    let _subscription = client.subscribe(&users, Some("UserList")).unwrap();
    client.fetch(&users, fetcher.query_fn()).await.unwrap();

    let mutation = add_user();
    mutation.run(&client, json!({"name": "Grace"})).await.unwrap();

    // Invalidation and its refetch were issued before `run` returned
    let entry = client.get_entry(&users).unwrap();
    assert_eq!(entry.status, QueryStatus::Pending);
    assert!(entry.is_fetching);
    assert_eq!(mutation.status(), MutationStatus::Success);

    let refreshed = client.fetch(&users, fetcher.query_fn()).await.unwrap();
    assert_eq!(refreshed, json!([{"id": 1}, {"id": 2}]));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_unmapped_mutation_invalidates_nothing() {
    let client = client_with_plugin(
        AutoInvalidatePlugin::new().on_mutation("other", [querylite::key!["users"]]),
    );
    client.set_query_data(&key!["users"], json!([])).unwrap();
    let invalidations_before = client.stats().invalidations;

    add_user().run(&client, json!({"name": "x"})).await.unwrap();
    assert_eq!(client.stats().invalidations, invalidations_before);
}

#[tokio::test]
async fn test_derived_keys_use_variables() {
    let client = client_with_plugin(AutoInvalidatePlugin::new().on_mutation_with(
        "add-comment",
        |variables, _data| {
            vec![querylite::key![
                "documents",
                variables["document"].as_str().unwrap_or_default()
            ]]
        },
    ));
    client.set_query_data(&key!["documents", "7"], json!({})).unwrap();
    client.set_query_data(&key!["documents", "8"], json!({})).unwrap();

    Mutation::new("add-comment", |_variables, _ctx| async move { Ok(json!(null)) })
        .run(&client, json!({"document": "7"}))
        .await
        .unwrap();

    assert!(client.get_entry(&key!["documents", "7"]).unwrap().is_stale);
    assert_eq!(client.stats().invalidations, 1);
}

#[tokio::test]
async fn test_failure_fires_error_hooks_and_skips_invalidation() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let client = QueryClient::builder()
        .plugin(AutoInvalidatePlugin::new().on_mutation("save", [querylite::key!["users"]]))
        .on(HookPoint::OnMutationError, {
            let recorded = recorded.clone();
            move |_client, event| {
                if let HookEvent::MutationError { error, .. } = event {
                    recorded.lock().push(format!("error: {}", error));
                }
                Ok(())
            }
        })
        .on(HookPoint::OnMutationSettled, move |_client, event| {
            if let HookEvent::MutationSettled { status, .. } = event {
                recorded.lock().push(format!("settled: {}", status));
            }
            Ok(())
        })
        .build()
        .unwrap();
    client.set_query_data(&key!["users"], json!([])).unwrap();

    let mutation = Mutation::new("save", |_variables, _ctx| async move {
        Err(FetchError::new("conflict"))
    });
    let err = mutation.run(&client, json!(1)).await.unwrap_err();

    assert_eq!(err.fetch_error(), Some(&FetchError::new("conflict")));
    assert_eq!(mutation.status(), MutationStatus::Error);
    assert_eq!(*events.lock(), vec!["error: conflict", "settled: error"]);
    assert_eq!(client.stats().invalidations, 0);
}

#[tokio::test(start_paused = true)]
async fn test_latest_run_owns_state() {
    let client = QueryClient::new();
    let mutation = Mutation::new("slow", |variables: Value, _ctx| async move {
        let wait = variables.as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(wait)).await;
        Ok(variables)
    });

    let (slow, fast) = tokio::join!(
        mutation.run(&client, json!(100)),
        mutation.run(&client, json!(10))
    );
    assert_eq!(slow.unwrap(), json!(100));
    assert_eq!(fast.unwrap(), json!(10));

    let state = mutation.state();
    assert_eq!(state.variables, Some(json!(10)));
    assert_eq!(state.data, Some(json!(10)));
}
