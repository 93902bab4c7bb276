// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the unified cache.
//!
//! Uses the `metrics` crate facade; the host application installs the
//! exporter (Prometheus, OTEL, a debugging recorder, ...). Without a recorder
//! every call is a no-op.
//!
//! # Metric Naming Convention
//! - `unified_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: L1, L2, all
//! - `operation`: get, set, invalidate, clear, open
//! - `status`: hit, miss, success, error, skipped

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an operation outcome
pub fn record_operation(tier: &'static str, operation: &'static str, status: &'static str) {
    counter!(
        "unified_cache_operations_total",
        "tier" => tier,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &'static str, operation: &'static str, duration: Duration) {
    histogram!(
        "unified_cache_operation_seconds",
        "tier" => tier,
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Record an error by kind
pub fn record_error(tier: &'static str, operation: &'static str, kind: &'static str) {
    counter!(
        "unified_cache_errors_total",
        "tier" => tier,
        "operation" => operation,
        "kind" => kind
    )
    .increment(1);
}

/// Record one evicted entry
pub fn record_eviction(tier: &'static str, bytes: usize) {
    counter!("unified_cache_evictions_total", "tier" => tier).increment(1);
    counter!("unified_cache_evicted_bytes_total", "tier" => tier).increment(bytes as u64);
}

/// Record entries dropped because their TTL elapsed
pub fn record_expired(tier: &'static str, count: usize) {
    counter!("unified_cache_expired_total", "tier" => tier).increment(count as u64);
}

/// Set L1 gauges
pub fn set_l1_usage(entries: usize, bytes: usize) {
    gauge!("unified_cache_l1_entries").set(entries as f64);
    gauge!("unified_cache_l1_bytes").set(bytes as f64);
}

/// Set whether L2 is serving (1) or the cache is degraded (0)
pub fn set_l2_available(available: bool) {
    gauge!("unified_cache_l2_available").set(if available { 1.0 } else { 0.0 });
}

/// Set the number of L2 writes not yet settled
pub fn set_pending_writes(count: usize) {
    gauge!("unified_cache_l2_pending_writes").set(count as f64);
}

/// Record a key migration
pub fn record_migration(source: &'static str) {
    counter!("unified_cache_key_migrations_total", "source" => source).increment(1);
}

/// Record a startup phase duration
pub fn record_startup_phase(phase: &'static str, duration: Duration) {
    histogram!(
        "unified_cache_startup_phase_seconds",
        "phase" => phase
    )
    .record(duration.as_secs_f64());
}

/// Record the final startup outcome
pub fn record_startup(outcome: &'static str, duration: Duration) {
    counter!("unified_cache_startups_total", "outcome" => outcome).increment(1);
    histogram!("unified_cache_startup_seconds").record(duration.as_secs_f64());
}

/// RAII timer recording latency on drop.
///
/// # Example
///
/// ```
/// use unified_cache::LatencyTimer;
///
/// {
///     let _timer = LatencyTimer::new("L2", "get");
///     // ... work ...
/// } // recorded here
/// ```
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: std::time::Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}
