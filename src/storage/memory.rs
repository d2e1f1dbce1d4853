// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process implementation of every store trait.
//!
//! Backs the engine in tests and in embedded deployments where nothing
//! needs to survive a restart.

use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use crate::config::MediaQuality;
use crate::diagnostics::{ErrorEntry, EventEntry};
use crate::operation::{SyncOperation, SyncStatus};
use crate::record::{OfflineRecord, RecordKey};
use super::traits::{
    Attachment, AttachmentStore, DiagnosticsStore, OfflineDataStore, OperationStore, StorageError,
};

struct StoredAttachment {
    meta: Attachment,
    #[allow(dead_code)]
    bytes: Vec<u8>,
}

pub struct InMemoryStore {
    records: DashMap<RecordKey, OfflineRecord>,
    operations: DashMap<String, SyncOperation>,
    op_seq: AtomicU64,
    last_sync: DashMap<String, i64>,
    errors: RwLock<Vec<ErrorEntry>>,
    events: RwLock<Vec<EventEntry>>,
    attachments: DashMap<String, StoredAttachment>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            operations: DashMap::new(),
            op_seq: AtomicU64::new(0),
            last_sync: DashMap::new(),
            errors: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            attachments: DashMap::new(),
        }
    }

    /// Number of offline records across all users
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of stored attachments across all records
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Number of persisted error entries
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.read().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfflineDataStore for InMemoryStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<OfflineRecord>, StorageError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: &OfflineRecord) -> Result<bool, StorageError> {
        match self.records.entry(record.key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                let existing = existing.get_mut();
                existing.data = record.data.clone();
                existing.size = record.size;
                existing.version = record.version;
                existing.last_modified = record.last_modified;
                existing.last_accessed = record.last_accessed;
                Ok(false)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<bool, StorageError> {
        Ok(self.records.remove(key).is_some())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<OfflineRecord>, StorageError> {
        let mut records: Vec<OfflineRecord> = self
            .records
            .iter()
            .filter(|r| r.key().user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn touch(&self, key: &RecordKey, at: i64) -> Result<(), StorageError> {
        if let Some(mut record) = self.records.get_mut(key) {
            record.last_accessed = at;
        }
        Ok(())
    }

    async fn mark_synced(&self, key: &RecordKey, at: i64) -> Result<bool, StorageError> {
        match self.records.get_mut(key) {
            Some(mut record) => {
                record.last_synced = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl OperationStore for InMemoryStore {
    async fn insert_operation(&self, op: &SyncOperation) -> Result<SyncOperation, StorageError> {
        let mut op = op.clone();
        op.seq = self.op_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.operations.insert(op.id.clone(), op.clone());
        Ok(op)
    }

    async fn get_operation(&self, id: &str) -> Result<Option<SyncOperation>, StorageError> {
        Ok(self.operations.get(id).map(|o| o.value().clone()))
    }

    async fn update_operation(&self, op: &SyncOperation) -> Result<(), StorageError> {
        match self.operations.get_mut(&op.id) {
            Some(mut stored) => {
                *stored = op.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn delete_operation_if(&self, id: &str, status: SyncStatus) -> Result<bool, StorageError> {
        Ok(self.operations.remove_if(id, |_, op| op.status == status).is_some())
    }

    async fn operations_for_user(
        &self,
        user_id: &str,
        status: Option<SyncStatus>,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        let mut ops: Vec<SyncOperation> = self
            .operations
            .iter()
            .filter(|o| o.user_id == user_id && status.map_or(true, |s| o.status == s))
            .map(|o| o.value().clone())
            .collect();
        ops.sort_by_key(|o| o.seq);
        Ok(ops)
    }

    async fn users_with_pending(&self) -> Result<Vec<String>, StorageError> {
        let mut users: Vec<String> = self
            .operations
            .iter()
            .filter(|o| o.status == SyncStatus::Pending)
            .map(|o| o.user_id.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn set_last_sync(&self, user_id: &str, at: i64) -> Result<(), StorageError> {
        self.last_sync.insert(user_id.to_string(), at);
        Ok(())
    }

    async fn last_sync(&self, user_id: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.last_sync.get(user_id).map(|t| *t))
    }
}

#[async_trait]
impl DiagnosticsStore for InMemoryStore {
    async fn append_error(&self, entry: &ErrorEntry) -> Result<(), StorageError> {
        self.errors.write().push(entry.clone());
        Ok(())
    }

    async fn append_event(&self, entry: &EventEntry) -> Result<(), StorageError> {
        self.events.write().push(entry.clone());
        Ok(())
    }

    async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorEntry>, StorageError> {
        Ok(self.errors.read().iter().rev().take(limit).cloned().collect())
    }

    async fn recent_events(&self, user_id: &str, limit: usize) -> Result<Vec<EventEntry>, StorageError> {
        Ok(self
            .events
            .read()
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AttachmentStore for InMemoryStore {
    async fn list(&self, record: &RecordKey) -> Result<Vec<Attachment>, StorageError> {
        let mut found: Vec<Attachment> = self
            .attachments
            .iter()
            .filter(|a| &a.meta.record == record)
            .map(|a| a.meta.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn put(
        &self,
        record: &RecordKey,
        name: &str,
        quality: MediaQuality,
        bytes: Vec<u8>,
    ) -> Result<Attachment, StorageError> {
        let meta = Attachment {
            id: uuid::Uuid::new_v4().to_string(),
            record: record.clone(),
            name: name.to_string(),
            quality,
            size: bytes.len() as u64,
        };
        self.attachments
            .insert(meta.id.clone(), StoredAttachment { meta: meta.clone(), bytes });
        Ok(meta)
    }

    async fn delete(&self, attachment_id: &str) -> Result<u64, StorageError> {
        self.attachments
            .remove(attachment_id)
            .map(|(_, a)| a.meta.size)
            .ok_or(StorageError::NotFound)
    }
}
