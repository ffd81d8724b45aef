/// Benchmark for request deduplication and cache hit throughput
///
/// Measures how fast concurrent callers join a single in-flight fetch, how
/// fast fresh reads are served from the cache, and the cost of prefix
/// invalidation over a populated cache.

use querylite::{key, query_fn, ClientConfig, FetchContext, InvalidateOptions, QueryClient};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    println!("=== Dedup Throughput Benchmark ===\n");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let config = ClientConfig::default().with_stale_time(Duration::from_secs(600));
    let client = QueryClient::with_config(config).expect("Failed to create client");
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch = {
        let calls = calls.clone();
        query_fn(move |ctx: FetchContext| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(json!({"key": ctx.key.to_string()}))
            }
        })
    };

    // Benchmark: many concurrent callers on a handful of keys
    println!("📊 Concurrent Fetch Deduplication:");
    let callers = 10_000;
    let distinct_keys = 10;
    let dedup_start = Instant::now();
    runtime.block_on(async {
        let mut handles = Vec::with_capacity(callers);
        for i in 0..callers {
            let client = client.clone();
            let fetch = fetch.clone();
            handles.push(tokio::spawn(async move {
                client.fetch(&key!["bench", (i % distinct_keys) as i64], fetch).await
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    });
    let dedup_duration = dedup_start.elapsed();
    let dedup_ops_per_sec = callers as f64 / dedup_duration.as_secs_f64();
    println!("  Callers: {}", callers);
    println!("  Fetch function calls: {}", calls.load(Ordering::SeqCst));
    println!("  Time: {:?}", dedup_duration);
    println!("  Throughput: {:.0} callers/sec", dedup_ops_per_sec);
    println!();

    // Benchmark: fresh reads served without fetching
    println!("📊 Fresh Cache Hits:");
    let hit_iterations = 100_000;
    let hit_start = Instant::now();
    runtime.block_on(async {
        for i in 0..hit_iterations {
            let _ = client
                .query(&key!["bench", (i % distinct_keys) as i64], fetch.clone())
                .await;
        }
    });
    let hit_duration = hit_start.elapsed();
    let hit_ops_per_sec = hit_iterations as f64 / hit_duration.as_secs_f64();
    println!("  Iterations: {}", hit_iterations);
    println!("  Time: {:?}", hit_duration);
    println!("  Throughput: {:.0} reads/sec", hit_ops_per_sec);
    println!();

    // Benchmark: prefix invalidation over a large cache
    println!("📊 Prefix Invalidation:");
    let populated = 50_000;
    for i in 0..populated {
        let _ = client.set_query_data(&key!["items", (i % 100) as i64, i as i64], json!(i));
    }
    let invalidate_start = Instant::now();
    let mut matched = 0;
    for group in 0..100 {
        if let Ok(result) = client.invalidate(&key!["items", group as i64], InvalidateOptions::mark_only()) {
            matched += result.matched;
        }
    }
    let invalidate_duration = invalidate_start.elapsed();
    println!("  Entries: {}", client.entry_count());
    println!("  Matched: {}", matched);
    println!("  Time: {:?}", invalidate_duration);
    println!();

    let stats = client.stats();
    println!("=== Summary ===");
    println!("  Dedup joins:    {}", stats.dedup_joins);
    println!("  Fresh hits:     {}", stats.fresh_hits);
    println!("  Hit rate:       {:.1}%", stats.hit_rate() * 100.0);
    println!("  Dedup:          {:.0} callers/sec", dedup_ops_per_sec);
    println!("  Cache reads:    {:.0} reads/sec", hit_ops_per_sec);
}
