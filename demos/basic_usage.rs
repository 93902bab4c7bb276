// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic unified-cache usage example.
//!
//! Demonstrates:
//! 1. Opening a SQLite-backed durable tier in a temp directory
//! 2. Writing a few typed values
//! 3. Reading them back through equivalent raw keys
//! 4. Migrating a key and reading through the old name
//! 5. Displaying stats and captured metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! RUST_LOG=unified_cache=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use unified_cache::{CacheConfig, SqlEngine, UnifiedCacheManager};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price: f64,
    volume: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n=== unified-cache: Basic Usage Example ===\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and initialize
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let config = CacheConfig {
        l1_max_entries: 100,
        l2_namespaces: vec!["default".into(), "quotes".into()],
        ..Default::default()
    };

    SqlEngine::bootstrap();
    let engine = SqlEngine::from_config(&config)
        .unwrap_or_else(|| SqlEngine::sqlite(dir.path().join("cache.db")));
    let cache = UnifiedCacheManager::new(config, Arc::new(engine));
    println!("State: {}", cache.state());

    let state = cache.initialize().await;
    println!("Initialized: {state}");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write typed values
    // ─────────────────────────────────────────────────────────────────────────
    let quotes = [
        Quote { symbol: "AAPL".into(), price: 189.5, volume: 52_000_000 },
        Quote { symbol: "MSFT".into(), price: 411.2, volume: 21_000_000 },
        Quote { symbol: "NVDA".into(), price: 122.9, volume: 310_000_000 },
    ];
    for quote in &quotes {
        let raw = format!("{}?period=1d&interval=5m", quote.symbol);
        let start = Instant::now();
        cache.set_in("quotes", &raw, quote.clone(), Some(Duration::from_secs(300)))?;
        println!("  set quotes/{raw} ({:?})", start.elapsed());
    }
    cache.set("greeting", "hello".to_string(), None)?;
    cache.flush().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Read back through equivalent spellings
    // ─────────────────────────────────────────────────────────────────────────
    println!("\nReading back:");
    for raw in ["aapl|interval=5m,period=1d", "CACHE_MSFT?interval=5m&period=1d", "nvda?period=1d&interval=5m"] {
        let quote: Option<Quote> = cache.get_in("quotes", raw).await?;
        println!("  {raw} -> {quote:?}");
    }
    let missing: Option<Quote> = cache.get_in("quotes", "tsla").await?;
    println!("  tsla -> {missing:?}");

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Migrate a key
    // ─────────────────────────────────────────────────────────────────────────
    let changed = cache.migrate_key("greeting", "welcome", "default").await?;
    let via_old: Option<String> = cache.get("greeting").await?;
    println!("\nMigrated greeting -> welcome (ledger changed: {changed}), old name reads {via_old:?}");

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Stats and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let stats = cache.stats();
    println!("\nStats:");
    println!("  state={} l2_available={}", stats.state, stats.l2_available);
    println!("  l1_count={} l1_bytes={}", stats.l1_count, stats.l1_bytes);
    println!(
        "  hits={} misses={} hit_ratio={:.2} migrations={}",
        stats.hits,
        stats.misses,
        stats.hit_ratio(),
        stats.migration_count
    );

    println!("\nMetrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    cache.dispose().await;
    println!("\nDisposed. State: {}", cache.state());

    Ok(())
}

/// Print every captured metric, grouped by kind and sorted by name.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = vec![];
    let mut gauges = vec![];
    let mut histograms = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let name = if labels.is_empty() {
            key.name().to_string()
        } else {
            format!("{}{{{}}}", key.name(), labels.join(","))
        };

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, value) in &counters {
        println!("  counter   {name} = {value}");
    }
    for (name, value) in &gauges {
        println!("  gauge     {name} = {value:.2}");
    }
    for (name, count, sum) in &histograms {
        let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
        println!("  histogram {name} count={count} avg={avg:.6}");
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("  (no metrics recorded)");
    }
}
