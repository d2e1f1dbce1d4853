// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync processor: drains a user's queue through a pluggable transport.
//!
//! Operations are dispatched one at a time in enqueue order. A retryable
//! failure puts the operation back to `pending`, waits an exponential,
//! jittered delay and dispatches it again, until it completes or its retry
//! budget is spent. Every operation drained therefore ends `completed` or
//! `failed`.
//!
//! The processor governs whether and how often to retry. Transfer mechanics,
//! including timeouts, belong to the [`SyncTransport`] implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};
use crate::diagnostics::{codes, DiagnosticsLog, EventStatus, EventType};
use crate::error::{OfflineError, TransportError};
use crate::manager::OfflineRecordManager;
use crate::metrics;
use crate::quota::UserLocks;
use crate::operation::{SyncOpKind, SyncOperation, SyncStatus};
use crate::record::now_millis;
use crate::resilience::retry::RetryConfig;
use crate::storage::traits::{OperationStore, StorageError};

/// Moves data between the local cache and the origin.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn upload(&self, op: &SyncOperation) -> Result<(), TransportError>;
    async fn download(&self, op: &SyncOperation) -> Result<(), TransportError>;
    async fn delete(&self, op: &SyncOperation) -> Result<(), TransportError>;
}

/// Outcome of one [`SyncProcessor::drain`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Operations picked up
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Cancelled between pickup and dispatch
    pub skipped: usize,
    /// Re-dispatches after a retryable failure
    pub retries: usize,
    /// `in_progress` leftovers reset to `pending` before draining
    pub recovered: usize,
    pub duration: Duration,
}

pub struct SyncProcessor {
    operations: Arc<dyn OperationStore>,
    transport: Arc<dyn SyncTransport>,
    records: Arc<OfflineRecordManager>,
    diagnostics: Arc<DiagnosticsLog>,
    retry: RwLock<RetryConfig>,
    drain_locks: UserLocks,
}

impl SyncProcessor {
    pub fn new(
        operations: Arc<dyn OperationStore>,
        transport: Arc<dyn SyncTransport>,
        records: Arc<OfflineRecordManager>,
        diagnostics: Arc<DiagnosticsLog>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            operations,
            transport,
            records,
            diagnostics,
            retry: RwLock::new(retry),
            drain_locks: UserLocks::new(),
        }
    }

    pub fn set_retry_config(&self, retry: RetryConfig) {
        *self.retry.write() = retry;
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.read().clone()
    }

    /// Reset operations stuck `in_progress` (the process died mid-dispatch)
    /// back to `pending`. Their retry count is left alone.
    pub async fn recover_stalled(&self, user_id: &str) -> Result<usize, OfflineError> {
        let stalled = self
            .operations
            .operations_for_user(user_id, Some(SyncStatus::InProgress))
            .await?;

        let mut recovered = 0;
        for mut op in stalled {
            op.reset_stalled()?;
            match self.operations.update_operation(&op).await {
                Ok(()) => recovered += 1,
                Err(StorageError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if recovered > 0 {
            warn!(user_id, recovered, "Reset stalled sync operations");
        }
        Ok(recovered)
    }

    /// Process every pending operation of `user_id`, oldest first.
    ///
    /// Concurrent drains for the same user run one after the other.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self, user_id: &str) -> Result<DrainSummary, OfflineError> {
        let _guard = self.drain_locks.lock(user_id).await;

        let start = Instant::now();
        let mut summary = DrainSummary {
            recovered: self.recover_stalled(user_id).await?,
            ..Default::default()
        };

        let pending = self
            .operations
            .operations_for_user(user_id, Some(SyncStatus::Pending))
            .await?;

        for op in pending {
            summary.processed += 1;
            self.process(op, &mut summary).await?;
        }

        self.operations.set_last_sync(user_id, now_millis()).await?;
        summary.duration = start.elapsed();
        metrics::record_drain(summary.duration);

        let status = EventStatus::from_counts(summary.completed, summary.failed);
        self.diagnostics
            .event(
                user_id,
                EventType::Sync,
                status,
                format!(
                    "Processed {} sync operations: {} completed, {} failed",
                    summary.processed, summary.completed, summary.failed
                ),
                json!({
                    "processed": summary.processed,
                    "completed": summary.completed,
                    "failed": summary.failed,
                    "skipped": summary.skipped,
                    "retries": summary.retries,
                    "durationMs": summary.duration.as_millis() as u64,
                }),
            )
            .await;

        info!(
            user_id,
            processed = summary.processed,
            completed = summary.completed,
            failed = summary.failed,
            retries = summary.retries,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Sync queue drained"
        );
        Ok(summary)
    }

    /// Drive one operation to a terminal state.
    async fn process(
        &self,
        mut op: SyncOperation,
        summary: &mut DrainSummary,
    ) -> Result<(), OfflineError> {
        let retry = self.retry_config();
        let max_retries = retry.max_retries.unwrap_or(0) as u32;

        loop {
            op.start()?;
            match self.operations.update_operation(&op).await {
                Ok(()) => {}
                Err(StorageError::NotFound) => {
                    debug!(op_id = %op.id, "Sync operation cancelled before dispatch");
                    summary.skipped += 1;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            // Version the transport is about to send; a later local edit stays dirty.
            let uploading = match op.kind {
                SyncOpKind::Upload => self.current_version(&op).await,
                _ => None,
            };

            let result = self.dispatch(&op).await;
            match result {
                Ok(()) => {
                    op.complete()?;
                    self.operations.update_operation(&op).await?;
                    if let Some(version) = uploading {
                        self.stamp_synced(&op, version).await;
                    }
                    summary.completed += 1;
                    metrics::record_operation(op.kind.as_str(), "completed");
                    debug!(op_id = %op.id, kind = %op.kind, retries = op.retry_count, "Sync operation completed");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && op.retry_count < max_retries => {
                    op.requeue(e.to_string())?;
                    self.operations.update_operation(&op).await?;
                    summary.retries += 1;
                    metrics::record_retry(op.kind.as_str());

                    let delay = retry.delay_for(op.retry_count - 1);
                    warn!(
                        op_id = %op.id,
                        kind = %op.kind,
                        attempt = op.retry_count,
                        max_retries,
                        error = %e,
                        ?delay,
                        "Sync operation failed, will retry"
                    );
                    tokio::time::sleep(delay).await;

                    // A cancel during the backoff wins.
                    match self.operations.get_operation(&op.id).await? {
                        Some(current) if current.status == SyncStatus::Pending => op = current,
                        _ => {
                            summary.skipped += 1;
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    op.fail(e.to_string())?;
                    self.operations.update_operation(&op).await?;
                    summary.failed += 1;
                    metrics::record_operation(op.kind.as_str(), "failed");
                    self.diagnostics
                        .error(
                            codes::SYNC_FAILED,
                            format!(
                                "{} of {} failed after {} retries: {}",
                                op.kind, op.recipe_id, op.retry_count, e
                            ),
                            Some(&op.recipe_id),
                        )
                        .await;
                    return Ok(());
                }
            }
        }
    }

    async fn current_version(&self, op: &SyncOperation) -> Option<i64> {
        let key = op.record_key();
        match self.records.get_record(&key).await {
            Ok(record) => record.map(|r| r.version),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read record before upload");
                None
            }
        }
    }

    async fn stamp_synced(&self, op: &SyncOperation, version: i64) {
        let key = op.record_key();
        match self.records.mark_synced_if(&key, version).await {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, version, "Record changed during upload, left dirty"),
            Err(e) => warn!(key = %key, error = %e, "Failed to mark record synced"),
        }
    }

    async fn dispatch(&self, op: &SyncOperation) -> Result<(), TransportError> {
        match op.kind {
            SyncOpKind::Upload => self.transport.upload(op).await,
            SyncOpKind::Download => self.transport.download(op).await,
            SyncOpKind::Delete => self.transport.delete(op).await,
        }
    }
}
