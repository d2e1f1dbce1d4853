// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cleanup sweeper: reclaims storage held by stale offline records.
//!
//! A record is selected when it was last accessed before the cutoff (if one
//! is given) and, with `exclude_favorites`, when its payload is not flagged
//! as a favorite. A dry run reports exactly what a real sweep would remove
//! and mutates nothing.
//!
//! A real sweep holds the user's write guard from selection to the last
//! delete, so a record written or read while the sweep runs is judged on
//! its refreshed state rather than a stale snapshot.

use std::sync::Arc;
use std::time::Instant;
use serde_json::json;
use tracing::{debug, info, warn};
use crate::diagnostics::{codes, DiagnosticsLog, EventStatus, EventType};
use crate::error::OfflineError;
use crate::metrics;
use crate::quota::QuotaTracker;
use crate::record::{OfflineRecord, RecordKey};
use crate::storage::traits::{AttachmentStore, OfflineDataStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Only records with `last_accessed` strictly before this (epoch millis)
    pub older_than: Option<i64>,
    pub exclude_favorites: bool,
    pub dry_run: bool,
}

/// A single item the sweep could not remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub record: RecordKey,
    /// Attachment id, or `None` when the record itself failed
    pub attachment_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Records removed (or, in a dry run, that would be removed)
    pub removed_records: Vec<RecordKey>,
    /// Attachment ids actually deleted. Always empty in a dry run.
    pub removed_attachments: Vec<String>,
    /// Attachment bytes reclaimed (or reclaimable in a dry run)
    pub space_freed: u64,
    /// Payload bytes of the removed records, released from the storage quota
    pub record_bytes_freed: u64,
    pub dry_run: bool,
    pub failures: Vec<CleanupFailure>,
}

pub struct CleanupSweeper {
    records: Arc<dyn OfflineDataStore>,
    attachments: Arc<dyn AttachmentStore>,
    quota: Arc<QuotaTracker>,
    diagnostics: Arc<DiagnosticsLog>,
}

impl CleanupSweeper {
    pub fn new(
        records: Arc<dyn OfflineDataStore>,
        attachments: Arc<dyn AttachmentStore>,
        quota: Arc<QuotaTracker>,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> Self {
        Self { records, attachments, quota, diagnostics }
    }

    fn selects(options: &CleanupOptions, record: &OfflineRecord) -> bool {
        if let Some(cutoff) = options.older_than {
            if record.last_accessed >= cutoff {
                return false;
            }
        }
        !(options.exclude_favorites && record.is_favorite())
    }

    #[tracing::instrument(skip(self))]
    pub async fn cleanup(
        &self,
        user_id: &str,
        options: &CleanupOptions,
    ) -> Result<CleanupResult, OfflineError> {
        let start = Instant::now();
        let mut result = CleanupResult {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let _guard = if options.dry_run {
            None
        } else {
            Some(self.quota.lock_user(user_id).await)
        };

        let selected: Vec<OfflineRecord> = self
            .records
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|r| Self::selects(options, r))
            .collect();

        for record in selected {
            let attachments = match self.attachments.list(&record.key).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(key = %record.key, error = %e, "Failed to list attachments");
                    result.failures.push(CleanupFailure {
                        record: record.key.clone(),
                        attachment_id: None,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if options.dry_run {
                result.space_freed += attachments.iter().map(|a| a.size).sum::<u64>();
                result.record_bytes_freed += record.size;
                result.removed_records.push(record.key);
                continue;
            }

            for attachment in attachments {
                match self.attachments.delete(&attachment.id).await {
                    Ok(freed) => {
                        result.space_freed += freed;
                        result.removed_attachments.push(attachment.id);
                    }
                    Err(e) => {
                        warn!(key = %record.key, attachment = %attachment.id, error = %e, "Failed to delete attachment");
                        self.diagnostics
                            .error(
                                codes::CLEANUP_ATTACHMENT_FAILED,
                                format!("Failed to delete attachment {}: {}", attachment.id, e),
                                Some(&record.key.data_id),
                            )
                            .await;
                        result.failures.push(CleanupFailure {
                            record: record.key.clone(),
                            attachment_id: Some(attachment.id),
                            error: e.to_string(),
                        });
                    }
                }
            }

            match self.records.delete(&record.key).await {
                Ok(true) => {
                    debug!(key = %record.key, size = record.size, "Swept offline record");
                    result.record_bytes_freed += record.size;
                    result.removed_records.push(record.key);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %record.key, error = %e, "Failed to delete offline record");
                    result.failures.push(CleanupFailure {
                        record: record.key,
                        attachment_id: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !options.dry_run {
            metrics::record_cleanup(
                result.removed_records.len(),
                result.space_freed + result.record_bytes_freed,
            );
        }

        let elapsed = start.elapsed();
        let status = EventStatus::from_counts(result.removed_records.len(), result.failures.len());
        self.diagnostics
            .event(
                user_id,
                EventType::Cleanup,
                status,
                format!(
                    "{} {} records, {} bytes",
                    if options.dry_run { "Would remove" } else { "Removed" },
                    result.removed_records.len(),
                    result.space_freed
                ),
                json!({
                    "dryRun": options.dry_run,
                    "removedRecords": result.removed_records.len(),
                    "removedAttachments": result.removed_attachments.len(),
                    "spaceFreed": result.space_freed,
                    "recordBytesFreed": result.record_bytes_freed,
                    "failures": result.failures.len(),
                    "durationMs": elapsed.as_millis() as u64,
                }),
            )
            .await;

        info!(
            user_id,
            dry_run = options.dry_run,
            records = result.removed_records.len(),
            bytes = result.space_freed,
            failures = result.failures.len(),
            "Cleanup sweep finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::config::MediaQuality;
    use crate::manager::OfflineRecordManager;
    use crate::quota::QuotaLimits;
    use crate::record::{now_millis, RecordKind};
    use crate::storage::memory::InMemoryStore;
    use crate::storage::traits::{Attachment, StorageError};
    use serde_json::{json, Value};

    async fn seed(store: &InMemoryStore, id: &str, data: Value, last_accessed: i64) -> OfflineRecord {
        let mut rec = OfflineRecord::new(RecordKey::new("u", RecordKind::Recipe, id), data).unwrap();
        rec.last_accessed = last_accessed;
        store.upsert(&rec).await.unwrap();
        rec
    }

    fn quota(store: Arc<InMemoryStore>) -> Arc<QuotaTracker> {
        Arc::new(QuotaTracker::new(
            store,
            QuotaLimits { max_storage_size: 1_000_000, max_recipes: 100 },
        ))
    }

    fn sweeper(store: Arc<InMemoryStore>) -> CleanupSweeper {
        CleanupSweeper::new(
            store.clone(),
            store.clone(),
            quota(store.clone()),
            Arc::new(DiagnosticsLog::new(store)),
        )
    }

    #[tokio::test]
    async fn test_cutoff_and_favorites() {
        let store = Arc::new(InMemoryStore::new());
        let now = now_millis();
        seed(&store, "old", json!({}), now - 10_000).await;
        seed(&store, "old-fav", json!({"favorite": true}), now - 10_000).await;
        seed(&store, "fresh", json!({}), now).await;

        let result = sweeper(store.clone())
            .cleanup(
                "u",
                &CleanupOptions { older_than: Some(now - 1_000), exclude_favorites: true, dry_run: false },
            )
            .await
            .unwrap();

        let removed: Vec<&str> = result.removed_records.iter().map(|k| k.data_id.as_str()).collect();
        assert_eq!(removed, vec!["old"]);
        assert_eq!(store.record_count(), 2);
    }

    #[tokio::test]
    async fn test_without_cutoff_selects_everything() {
        let store = Arc::new(InMemoryStore::new());
        let a = seed(&store, "a", json!({"favorite": true}), now_millis()).await;
        let b = seed(&store, "b", json!({}), now_millis()).await;

        let result = sweeper(store.clone()).cleanup("u", &CleanupOptions::default()).await.unwrap();

        assert_eq!(result.removed_records.len(), 2);
        assert_eq!(result.space_freed, 0, "no attachments to reclaim");
        assert_eq!(result.record_bytes_freed, a.size + b.size);
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_is_pure_and_repeatable() {
        let store = Arc::new(InMemoryStore::new());
        let rec = seed(&store, "a", json!({"title": "x"}), 0).await;
        store.put(&rec.key, "cover.jpg", MediaQuality::High, vec![1; 100]).await.unwrap();

        let sweeper = sweeper(store.clone());
        let options = CleanupOptions { older_than: Some(now_millis()), exclude_favorites: false, dry_run: true };

        let first = sweeper.cleanup("u", &options).await.unwrap();
        let second = sweeper.cleanup("u", &options).await.unwrap();

        assert_eq!(first, second);
        assert!(first.dry_run);
        assert_eq!(first.removed_records, vec![rec.key.clone()]);
        assert!(first.removed_attachments.is_empty());
        assert_eq!(first.space_freed, 100);
        assert_eq!(first.record_bytes_freed, rec.size);
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.attachment_count(), 1);
    }

    #[tokio::test]
    async fn test_attachments_are_removed_with_record() {
        let store = Arc::new(InMemoryStore::new());
        let rec = seed(&store, "a", json!({}), 0).await;
        store.put(&rec.key, "1.jpg", MediaQuality::Low, vec![0; 10]).await.unwrap();
        store.put(&rec.key, "2.jpg", MediaQuality::Low, vec![0; 20]).await.unwrap();

        let result = sweeper(store.clone()).cleanup("u", &CleanupOptions::default()).await.unwrap();

        assert_eq!(result.removed_attachments.len(), 2);
        assert_eq!(result.space_freed, 30);
        assert_eq!(result.record_bytes_freed, rec.size);
        assert_eq!(store.attachment_count(), 0);
    }

    /// Attachment store whose deletes always fail.
    struct StuckAttachments(InMemoryStore);

    #[async_trait]
    impl AttachmentStore for StuckAttachments {
        async fn list(&self, record: &RecordKey) -> Result<Vec<Attachment>, StorageError> {
            self.0.list(record).await
        }
        async fn put(
            &self,
            record: &RecordKey,
            name: &str,
            quality: MediaQuality,
            bytes: Vec<u8>,
        ) -> Result<Attachment, StorageError> {
            self.0.put(record, name, quality, bytes).await
        }
        async fn delete(&self, _attachment_id: &str) -> Result<u64, StorageError> {
            Err(StorageError::Backend("permission denied".into()))
        }
    }

    #[tokio::test]
    async fn test_attachment_failure_does_not_abort_sweep() {
        let store = Arc::new(InMemoryStore::new());
        let attachments = Arc::new(StuckAttachments(InMemoryStore::new()));
        let a = seed(&store, "a", json!({}), 0).await;
        seed(&store, "b", json!({}), 0).await;
        attachments.put(&a.key, "x.jpg", MediaQuality::High, vec![0; 5]).await.unwrap();

        let sweeper = CleanupSweeper::new(
            store.clone(),
            attachments,
            quota(store.clone()),
            Arc::new(DiagnosticsLog::new(store.clone())),
        );
        let result = sweeper.cleanup("u", &CleanupOptions::default()).await.unwrap();

        assert_eq!(result.removed_records.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].attachment_id.is_some());
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.error_count(), 1);
    }

    /// Attachment store whose `list` parks until released, holding the sweep
    /// between selection and delete.
    struct ParkedList {
        inner: InMemoryStore,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl AttachmentStore for ParkedList {
        async fn list(&self, record: &RecordKey) -> Result<Vec<Attachment>, StorageError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.list(record).await
        }
        async fn put(
            &self,
            record: &RecordKey,
            name: &str,
            quality: MediaQuality,
            bytes: Vec<u8>,
        ) -> Result<Attachment, StorageError> {
            self.inner.put(record, name, quality, bytes).await
        }
        async fn delete(&self, attachment_id: &str) -> Result<u64, StorageError> {
            AttachmentStore::delete(&self.inner, attachment_id).await
        }
    }

    #[tokio::test]
    async fn test_write_during_sweep_survives() {
        let store = Arc::new(InMemoryStore::new());
        let attachments = Arc::new(ParkedList {
            inner: InMemoryStore::new(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let quota = quota(store.clone());
        let manager = Arc::new(OfflineRecordManager::new(store.clone(), attachments.clone(), quota.clone()));
        let sweeper = Arc::new(CleanupSweeper::new(
            store.clone(),
            attachments.clone(),
            quota,
            Arc::new(DiagnosticsLog::new(store.clone())),
        ));
        seed(&store, "r1", json!({"v": "stale"}), 0).await;

        let sweep = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move {
                let options = CleanupOptions { older_than: Some(1_000), exclude_favorites: false, dry_run: false };
                sweeper.cleanup("u", &options).await
            })
        };
        attachments.entered.notified().await;

        let write = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.store("u", RecordKind::Recipe, "r1", json!({"v": "fresh"})).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!write.is_finished(), "writer waits for the sweep");

        attachments.release.notify_one();
        let result = sweep.await.unwrap().unwrap();
        write.await.unwrap().unwrap();

        assert_eq!(result.removed_records.len(), 1);
        let key = RecordKey::new("u", RecordKind::Recipe, "r1");
        let kept = store.get(&key).await.unwrap().unwrap();
        assert_eq!(kept.data, json!({"v": "fresh"}));
    }
}
