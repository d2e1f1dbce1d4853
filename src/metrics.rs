// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the offline engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `offline_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size histograms
//!
//! # Labels
//! - `kind`: recipe, collection, list (records) or upload, download, delete (operations)
//! - `status`: success, rejected, completed, failed, missing
//! - `backend`: memory, sql

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an offline store attempt
pub fn record_store(kind: &str, status: &str) {
    counter!(
        "offline_sync_store_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a write refused by the quota tracker
pub fn record_quota_rejection(reason: &str) {
    counter!(
        "offline_sync_quota_rejections_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a sync operation reaching a terminal status
pub fn record_operation(kind: &str, status: &str) {
    counter!(
        "offline_sync_operations_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a transient failure that was requeued
pub fn record_retry(kind: &str) {
    counter!(
        "offline_sync_retries_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record how long one queue drain took
pub fn record_drain(duration: Duration) {
    histogram!("offline_sync_drain_seconds").record(duration.as_secs_f64());
}

/// Set the pending operation count seen by the last stats call
pub fn set_pending_operations(count: usize) {
    gauge!("offline_sync_pending_operations").set(count as f64);
}

/// Record a cleanup sweep
pub fn record_cleanup(records: usize, bytes: u64) {
    counter!("offline_sync_cleanup_records_total").increment(records as u64);
    counter!("offline_sync_cleanup_bytes_total").increment(bytes);
}

/// Record the outcome of one bulk download item
pub fn record_download_item(status: &str) {
    counter!(
        "offline_sync_download_items_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a finished bulk download
pub fn record_download(bytes: u64, duration: Duration) {
    histogram!("offline_sync_download_bytes").record(bytes as f64);
    histogram!("offline_sync_download_seconds").record(duration.as_secs_f64());
}

/// Record a diagnostics error entry
pub fn record_error(code: &str) {
    counter!(
        "offline_sync_errors_total",
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record a failed attempt to reach a storage backend
pub fn record_connection_error(backend: &str) {
    counter!(
        "offline_sync_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record storage backend latency
pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "offline_sync_backend_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// RAII timer that records backend latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.backend, self.operation, self.start.elapsed());
    }
}
