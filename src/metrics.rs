// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for snapstore.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host program is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `snapstore_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `endpoint`: primary, secondary, or a backend name
//! - `operation`: save, fetch, list, delete
//! - `status`: success, error, skipped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a store operation outcome
pub fn record_operation(endpoint: &str, operation: &str, status: &str) {
    counter!(
        "snapstore_operations_total",
        "endpoint" => endpoint.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(endpoint: &str, operation: &str, duration: Duration) {
    histogram!(
        "snapstore_operation_seconds",
        "endpoint" => endpoint.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record circuit breaker state change (0 = closed, 1 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "snapstore_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Set consecutive failure count tracked by a circuit breaker
pub fn set_circuit_failures(circuit: &str, count: u32) {
    gauge!(
        "snapstore_circuit_breaker_failures",
        "circuit" => circuit.to_string()
    )
    .set(count as f64);
}

/// Record circuit breaker call
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "snapstore_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a chunk upload attempt outcome
pub fn record_chunk_upload(status: &str) {
    counter!(
        "snapstore_chunk_uploads_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a scheduled chunk retry
pub fn record_chunk_retry() {
    counter!("snapstore_chunk_retries_total").increment(1);
}

/// Record the size of a merged dual-endpoint listing
pub fn record_merged_list(total: usize, primary: usize, secondary: usize) {
    gauge!("snapstore_merged_snapshots").set(total as f64);
    gauge!("snapstore_listed_snapshots", "endpoint" => "primary").set(primary as f64);
    gauge!("snapstore_listed_snapshots", "endpoint" => "secondary").set(secondary as f64);
}

/// Record a delete that only reached one endpoint
pub fn record_single_endpoint_delete() {
    counter!("snapstore_single_endpoint_deletes_total").increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    endpoint: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(endpoint: &'static str, operation: &'static str) -> Self {
        Self {
            endpoint,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.endpoint, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder the macros are no-ops; these only
    // exercise the call paths.

    #[test]
    fn test_record_operation() {
        record_operation("primary", "save", "success");
        record_operation("secondary", "fetch", "error");
    }

    #[test]
    fn test_circuit_metrics() {
        set_circuit_state("primary", 1);
        set_circuit_failures("primary", 3);
        record_circuit_call("primary", "skipped");
    }

    #[test]
    fn test_chunk_and_list_metrics() {
        record_chunk_upload("success");
        record_chunk_retry();
        record_merged_list(3, 2, 2);
        record_single_endpoint_delete();
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("primary", "list");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_metrics_reach_installed_recorder() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            record_operation("primary", "save", "success");
            record_operation("primary", "save", "success");
            set_circuit_state("primary", 1);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let value_of = |name: &str| {
            snapshot
                .iter()
                .find(|(key, ..)| key.key().name() == name)
                .map(|(_, _, _, value)| value.clone())
        };

        assert_eq!(value_of("snapstore_operations_total"), Some(&DebugValue::Counter(2)));
        assert!(matches!(
            value_of("snapstore_circuit_breaker_state"),
            Some(DebugValue::Gauge(v)) if v.into_inner() == 1.0
        ));
    }
}
