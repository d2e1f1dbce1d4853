// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline engine facade.
//!
//! [`OfflineEngine`] wires the quota tracker, record manager, sync queue and
//! processor, cleanup sweeper, bulk download job and diagnostics log together.
//! Every collaborator is passed in through [`OfflineStores`] and the
//! constructor; nothing is looked up from global state.
//!
//! # Example
//!
//! ```rust,no_run
//! use offline_sync::{OfflineConfig, OfflineEngine, OfflineStores, RecordKind};
//! # use offline_sync::{SyncTransport, RecipeSource};
//! # use std::sync::Arc;
//! use serde_json::json;
//!
//! # async fn demo(transport: Arc<dyn SyncTransport>, source: Arc<dyn RecipeSource>) {
//! let engine = OfflineEngine::new(
//!     OfflineConfig::default(),
//!     OfflineStores::in_memory(),
//!     transport,
//!     source,
//! );
//!
//! engine.store("alice", RecordKind::Recipe, "r1", json!({"title": "Soup"})).await.unwrap();
//! assert!(engine.get("alice", RecordKind::Recipe, "r1").await.unwrap().is_some());
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use crate::cleanup::{CleanupOptions, CleanupResult, CleanupSweeper};
use crate::config::{ConflictResolution, OfflineConfig};
use crate::diagnostics::{DiagnosticsLog, ErrorEntry, EventEntry};
use crate::download::{BulkDownloadJob, DownloadOptions, DownloadResult, RecipeSource};
use crate::error::OfflineError;
use crate::manager::OfflineRecordManager;
use crate::metrics;
use crate::operation::{SyncOpKind, SyncOperation};
use crate::processor::{DrainSummary, SyncProcessor, SyncTransport};
use crate::queue::SyncQueue;
use crate::quota::{QuotaLimits, QuotaTracker, QuotaUsage};
use crate::record::{OfflineRecord, RecordKind};
use crate::storage::memory::InMemoryStore;
use crate::storage::traits::{AttachmentStore, DiagnosticsStore, OfflineDataStore, OperationStore};

/// The persistence collaborators the engine is built on.
#[derive(Clone)]
pub struct OfflineStores {
    pub records: Arc<dyn OfflineDataStore>,
    pub operations: Arc<dyn OperationStore>,
    pub diagnostics: Arc<dyn DiagnosticsStore>,
    pub attachments: Arc<dyn AttachmentStore>,
}

impl OfflineStores {
    /// One backend serving every collection.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: OfflineDataStore + OperationStore + DiagnosticsStore + AttachmentStore + 'static,
    {
        Self {
            records: store.clone(),
            operations: store.clone(),
            diagnostics: store.clone(),
            attachments: store,
        }
    }

    /// Fresh, empty in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::shared(Arc::new(InMemoryStore::new()))
    }
}

/// Per-user snapshot of offline usage and sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineStats {
    pub total_size: u64,
    /// Every kind is present, zero when the user has none
    pub record_counts: BTreeMap<RecordKind, u64>,
    pub pending_operations: usize,
    pub failed_operations: usize,
    /// Completion time of the last drain (epoch millis)
    pub last_sync: Option<i64>,
    pub max_storage_size: u64,
    pub max_recipes: u64,
}

pub struct OfflineEngine {
    config: RwLock<OfflineConfig>,
    stores: OfflineStores,
    quota: Arc<QuotaTracker>,
    records: Arc<OfflineRecordManager>,
    queue: SyncQueue,
    processor: SyncProcessor,
    sweeper: CleanupSweeper,
    downloader: BulkDownloadJob,
    diagnostics: Arc<DiagnosticsLog>,
}

impl OfflineEngine {
    pub fn new(
        config: OfflineConfig,
        stores: OfflineStores,
        transport: Arc<dyn SyncTransport>,
        source: Arc<dyn RecipeSource>,
    ) -> Self {
        let quota = Arc::new(QuotaTracker::new(stores.records.clone(), QuotaLimits::from(&config)));
        let records = Arc::new(OfflineRecordManager::new(
            stores.records.clone(),
            stores.attachments.clone(),
            quota.clone(),
        ));
        let diagnostics = Arc::new(DiagnosticsLog::new(stores.diagnostics.clone()));

        let processor = SyncProcessor::new(
            stores.operations.clone(),
            transport,
            records.clone(),
            diagnostics.clone(),
            config.retry_config(),
        );
        let sweeper = CleanupSweeper::new(
            stores.records.clone(),
            stores.attachments.clone(),
            quota.clone(),
            diagnostics.clone(),
        );
        let downloader = BulkDownloadJob::new(source, records.clone(), diagnostics.clone());

        Self {
            config: RwLock::new(config),
            queue: SyncQueue::new(stores.operations.clone()),
            stores,
            quota,
            records,
            processor,
            sweeper,
            downloader,
            diagnostics,
        }
    }

    #[must_use]
    pub fn config(&self) -> OfflineConfig {
        self.config.read().clone()
    }

    /// Apply new settings. Limits and retry policy take effect for the next
    /// write and the next dispatched operation.
    pub fn update_config(&self, config: OfflineConfig) {
        self.quota.set_limits(QuotaLimits::from(&config));
        self.processor.set_retry_config(config.retry_config());
        info!(
            max_storage_size = config.max_storage_size,
            max_recipes = config.max_recipes,
            retry_attempts = config.retry_attempts,
            auto_sync = config.auto_sync,
            "Offline config updated"
        );
        *self.config.write() = config;
    }

    /// The configured policy. No automated merge is performed by this engine.
    #[must_use]
    pub fn conflict_resolution(&self) -> ConflictResolution {
        self.config.read().conflict_resolution
    }

    // --- records ---

    pub async fn store(
        &self,
        user_id: &str,
        kind: RecordKind,
        data_id: &str,
        data: Value,
    ) -> Result<OfflineRecord, OfflineError> {
        self.records.store(user_id, kind, data_id, data).await
    }

    pub async fn get(
        &self,
        user_id: &str,
        kind: RecordKind,
        data_id: &str,
    ) -> Result<Option<Value>, OfflineError> {
        self.records.get(user_id, kind, data_id).await
    }

    pub async fn delete(
        &self,
        user_id: &str,
        kind: RecordKind,
        data_id: &str,
    ) -> Result<bool, OfflineError> {
        self.records.delete(user_id, kind, data_id).await
    }

    pub async fn total_size(&self, user_id: &str) -> Result<u64, OfflineError> {
        self.records.total_size(user_id).await
    }

    pub async fn dirty_records(&self, user_id: &str) -> Result<Vec<OfflineRecord>, OfflineError> {
        self.records.dirty_records(user_id).await
    }

    pub async fn quota_usage(&self, user_id: &str) -> Result<QuotaUsage, OfflineError> {
        self.quota.usage(user_id).await
    }

    // --- sync ---

    pub async fn enqueue(
        &self,
        user_id: &str,
        kind: SyncOpKind,
        recipe_id: &str,
    ) -> Result<SyncOperation, OfflineError> {
        self.queue.enqueue(user_id, kind, recipe_id).await
    }

    pub async fn cancel(&self, op_id: &str) -> Result<(), OfflineError> {
        self.queue.cancel(op_id).await
    }

    pub async fn operation(&self, op_id: &str) -> Result<Option<SyncOperation>, OfflineError> {
        self.queue.get(op_id).await
    }

    pub async fn pending_operations(&self, user_id: &str) -> Result<Vec<SyncOperation>, OfflineError> {
        self.queue.pending(user_id).await
    }

    pub async fn failed_operations(&self, user_id: &str) -> Result<Vec<SyncOperation>, OfflineError> {
        self.queue.failed(user_id).await
    }

    pub async fn drain(&self, user_id: &str) -> Result<DrainSummary, OfflineError> {
        self.processor.drain(user_id).await
    }

    /// Drain every user with pending operations. Returns how many users were drained.
    pub async fn sync_all(&self) -> Result<usize, OfflineError> {
        let users = self.stores.operations.users_with_pending().await?;
        let mut drained = 0;
        for user_id in users {
            match self.processor.drain(&user_id).await {
                Ok(_) => drained += 1,
                Err(e) => warn!(user_id = %user_id, error = %e, "Background drain failed"),
            }
        }
        Ok(drained)
    }

    /// Periodically drain all queues until `shutdown` becomes `true` (or its
    /// sender is dropped). The interval and the `auto_sync` switch are re-read
    /// from the current config on every tick.
    #[tracing::instrument(skip_all)]
    pub async fn run_auto_sync(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Auto-sync loop running");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let (enabled, period) = {
                let config = self.config.read();
                (config.auto_sync, config.sync_interval().max(Duration::from_secs(1)))
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                _ = tokio::time::sleep(period) => {
                    if !enabled {
                        continue;
                    }
                    match self.sync_all().await {
                        Ok(users) => debug!(users, "Auto-sync tick finished"),
                        Err(e) => warn!(error = %e, "Auto-sync tick failed"),
                    }
                }
            }
        }

        info!("Auto-sync loop stopped");
    }

    // --- maintenance ---

    pub async fn cleanup(
        &self,
        user_id: &str,
        options: &CleanupOptions,
    ) -> Result<CleanupResult, OfflineError> {
        self.sweeper.cleanup(user_id, options).await
    }

    /// Download a batch of recipes. Without an explicit quality the configured
    /// `media_quality` applies.
    pub async fn download(&self, user_id: &str, options: &DownloadOptions) -> DownloadResult {
        let quality = self.config.read().media_quality;
        self.downloader.download(user_id, options, quality).await
    }

    pub async fn stats(&self, user_id: &str) -> Result<OfflineStats, OfflineError> {
        let records = self.records.records(user_id).await?;
        let mut record_counts: BTreeMap<RecordKind, u64> =
            RecordKind::ALL.iter().map(|k| (*k, 0)).collect();
        for record in &records {
            *record_counts.entry(record.key.kind).or_default() += 1;
        }

        let pending_operations = self.queue.pending(user_id).await?.len();
        metrics::set_pending_operations(pending_operations);
        let limits = self.quota.limits();

        Ok(OfflineStats {
            total_size: records.iter().map(|r| r.size).sum(),
            record_counts,
            pending_operations,
            failed_operations: self.queue.failed(user_id).await?.len(),
            last_sync: self.stores.operations.last_sync(user_id).await?,
            max_storage_size: limits.max_storage_size,
            max_recipes: limits.max_recipes,
        })
    }

    pub async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorEntry>, OfflineError> {
        Ok(self.diagnostics.recent_errors(limit).await?)
    }

    pub async fn recent_events(&self, user_id: &str, limit: usize) -> Result<Vec<EventEntry>, OfflineError> {
        Ok(self.diagnostics.recent_events(user_id, limit).await?)
    }
}
