// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline record lifecycle: quota-checked writes, lookups, deletes and
//! dirty tracking.
//!
//! Every mutation of a user's records and their attachments runs under the
//! user's write guard from [`QuotaTracker::lock_user`].

use std::collections::HashSet;
use std::sync::Arc;
use serde_json::Value;
use tracing::{debug, warn};
use crate::config::MediaQuality;
use crate::download::AttachmentBlob;
use crate::error::OfflineError;
use crate::metrics;
use crate::quota::QuotaTracker;
use crate::record::{now_millis, payload_size, OfflineRecord, RecordKey, RecordKind};
use crate::storage::traits::{AttachmentStore, OfflineDataStore};

pub struct OfflineRecordManager {
    store: Arc<dyn OfflineDataStore>,
    attachments: Arc<dyn AttachmentStore>,
    quota: Arc<QuotaTracker>,
}

impl OfflineRecordManager {
    pub fn new(
        store: Arc<dyn OfflineDataStore>,
        attachments: Arc<dyn AttachmentStore>,
        quota: Arc<QuotaTracker>,
    ) -> Self {
        Self { store, attachments, quota }
    }

    /// Cache `data` under `(user_id, kind, data_id)`.
    ///
    /// The user's write guard is held from the quota check through the upsert,
    /// so concurrent writes for one user cannot jointly overshoot the quota.
    /// `version` and `last_modified` strictly advance on every rewrite.
    #[tracing::instrument(skip(self, data))]
    pub async fn store(
        &self,
        user_id: &str,
        kind: RecordKind,
        data_id: &str,
        data: Value,
    ) -> Result<OfflineRecord, OfflineError> {
        let size = payload_size(&data)?;
        let key = RecordKey::new(user_id, kind, data_id);

        let _guard = self.quota.lock_user(user_id).await;

        let existing = self.store.get(&key).await?;
        if let Err(e) = self
            .quota
            .check_replacement(user_id, kind, size, existing.as_ref().map(|r| r.size))
            .await
        {
            metrics::record_store(kind.as_str(), "rejected");
            return Err(e);
        }

        let now = now_millis();
        let record = match existing {
            Some(prev) => OfflineRecord {
                key,
                data,
                version: now.max(prev.version + 1),
                size,
                last_modified: now.max(prev.last_modified + 1),
                last_synced: prev.last_synced,
                last_accessed: now,
            },
            None => OfflineRecord {
                key,
                data,
                version: now,
                size,
                last_modified: now,
                last_synced: now,
                last_accessed: now,
            },
        };

        let inserted = self.store.upsert(&record).await?;
        metrics::record_store(kind.as_str(), "success");
        debug!(key = %record.key, size, inserted, "Offline record stored");
        Ok(record)
    }

    /// Put `previous` back exactly as it was, or remove the record (and its
    /// attachments) when there was nothing before. Undoes a [`store`](Self::store)
    /// whose follow-up work failed.
    pub async fn restore(
        &self,
        key: &RecordKey,
        previous: Option<&OfflineRecord>,
    ) -> Result<(), OfflineError> {
        match previous {
            Some(record) => {
                let _guard = self.quota.lock_user(&key.user_id).await;
                self.store.upsert(record).await?;
            }
            None => {
                self.delete(&key.user_id, key.kind, &key.data_id).await?;
            }
        }
        debug!(key = %key, restored = previous.is_some(), "Offline record rolled back");
        Ok(())
    }

    /// Payload of a cached record, or `None` if nothing is cached.
    /// Refreshes `last_accessed` on a hit.
    pub async fn get(
        &self,
        user_id: &str,
        kind: RecordKind,
        data_id: &str,
    ) -> Result<Option<Value>, OfflineError> {
        let key = RecordKey::new(user_id, kind, data_id);
        let Some(record) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let _guard = self.quota.lock_user(user_id).await;
        if let Err(e) = self.store.touch(&key, now_millis()).await {
            warn!(key = %key, error = %e, "Failed to refresh last_accessed");
        }
        Ok(Some(record.data))
    }

    /// Full record without touching `last_accessed`.
    pub async fn get_record(&self, key: &RecordKey) -> Result<Option<OfflineRecord>, OfflineError> {
        Ok(self.store.get(key).await?)
    }

    /// Remove a cached record and, best-effort, its attachments.
    /// Idempotent: returns `false` if nothing was there.
    pub async fn delete(
        &self,
        user_id: &str,
        kind: RecordKind,
        data_id: &str,
    ) -> Result<bool, OfflineError> {
        let key = RecordKey::new(user_id, kind, data_id);
        let _guard = self.quota.lock_user(user_id).await;

        let removed = self.store.delete(&key).await?;
        let detached = self.remove_attachments(&key, &HashSet::new()).await;
        debug!(key = %key, removed, detached, "Offline record deleted");
        Ok(removed)
    }

    /// Swap the attachments of `key` for `blobs`, returning the bytes written.
    ///
    /// New files are written first. If any write fails, the ones already
    /// written are removed again and the previous set is left as it was.
    /// Only after every write succeeded are the previous files removed.
    pub async fn replace_attachments(
        &self,
        key: &RecordKey,
        quality: MediaQuality,
        blobs: Vec<AttachmentBlob>,
    ) -> Result<u64, OfflineError> {
        let _guard = self.quota.lock_user(&key.user_id).await;

        let mut written: HashSet<String> = HashSet::new();
        let mut bytes = 0;
        for blob in blobs {
            match self.attachments.put(key, &blob.name, quality, blob.bytes).await {
                Ok(stored) => {
                    bytes += stored.size;
                    written.insert(stored.id);
                }
                Err(e) => {
                    for id in &written {
                        if let Err(e) = self.attachments.delete(id).await {
                            warn!(key = %key, attachment = %id, error = %e, "Failed to remove partial attachment");
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        self.remove_attachments(key, &written).await;
        Ok(bytes)
    }

    /// Best-effort removal of the attachments of `key` not in `keep`.
    /// Returns how many were removed.
    async fn remove_attachments(&self, key: &RecordKey, keep: &HashSet<String>) -> usize {
        let existing = match self.attachments.list(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to list attachments");
                return 0;
            }
        };

        let mut removed = 0;
        for attachment in existing.into_iter().filter(|a| !keep.contains(&a.id)) {
            match self.attachments.delete(&attachment.id).await {
                Ok(_) => removed += 1,
                Err(e) => {
                    warn!(key = %key, attachment = %attachment.id, error = %e, "Failed to delete attachment")
                }
            }
        }
        removed
    }

    pub async fn total_size(&self, user_id: &str) -> Result<u64, OfflineError> {
        Ok(self.store.total_size(user_id).await?)
    }

    pub async fn records(&self, user_id: &str) -> Result<Vec<OfflineRecord>, OfflineError> {
        Ok(self.store.list_for_user(user_id).await?)
    }

    /// Records modified locally since their last successful sync.
    pub async fn dirty_records(&self, user_id: &str) -> Result<Vec<OfflineRecord>, OfflineError> {
        Ok(self
            .store
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(OfflineRecord::is_dirty)
            .collect())
    }

    /// Stamp a record as reconciled with the origin. Returns whether it exists.
    pub async fn mark_synced(&self, key: &RecordKey) -> Result<bool, OfflineError> {
        let _guard = self.quota.lock_user(&key.user_id).await;
        let Some(record) = self.store.get(key).await? else {
            return Ok(false);
        };
        self.stamp(&record).await
    }

    /// Stamp a record as reconciled only if it is still at `version`, the
    /// version that was sent upstream. Returns whether it was stamped; an edit
    /// made in the meantime keeps the record dirty.
    pub async fn mark_synced_if(
        &self,
        key: &RecordKey,
        version: i64,
    ) -> Result<bool, OfflineError> {
        let _guard = self.quota.lock_user(&key.user_id).await;
        match self.store.get(key).await? {
            Some(record) if record.version == version => self.stamp(&record).await,
            _ => Ok(false),
        }
    }

    async fn stamp(&self, record: &OfflineRecord) -> Result<bool, OfflineError> {
        let at = now_millis().max(record.last_modified);
        Ok(self.store.mark_synced(&record.key, at).await?)
    }
}
