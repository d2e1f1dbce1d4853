// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Narrow store interfaces the engine is built on.
//!
//! Each trait maps onto one persisted collection group:
//!
//! | Trait | Collections |
//! |---|---|
//! | [`OfflineDataStore`] | `offline_data` |
//! | [`OperationStore`] | `sync_operations`, `offline_stats` |
//! | [`DiagnosticsStore`] | `offline_errors`, `offline_events` |
//! | [`AttachmentStore`] | attachment files belonging to offline records |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::config::MediaQuality;
use crate::diagnostics::{ErrorEntry, EventEntry};
use crate::operation::{SyncOperation, SyncStatus};
use crate::record::{OfflineRecord, RecordKey, RecordKind};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored data could not be decoded: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait OfflineDataStore: Send + Sync {
    async fn get(&self, key: &RecordKey) -> Result<Option<OfflineRecord>, StorageError>;

    /// Insert the record, or update an existing one in place.
    ///
    /// On update `data`, `size`, `version`, `last_modified` and `last_accessed`
    /// are replaced and `last_synced` is left untouched. Returns `true` when a
    /// new record was inserted.
    async fn upsert(&self, record: &OfflineRecord) -> Result<bool, StorageError>;

    /// Returns whether a record was removed. Absent keys are not an error.
    async fn delete(&self, key: &RecordKey) -> Result<bool, StorageError>;

    /// All records of a user, ordered by key.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<OfflineRecord>, StorageError>;

    /// Set `last_accessed`. Missing records are ignored.
    async fn touch(&self, key: &RecordKey, at: i64) -> Result<(), StorageError>;

    /// Set `last_synced`. Returns whether the record exists.
    async fn mark_synced(&self, key: &RecordKey, at: i64) -> Result<bool, StorageError>;

    /// Sum of `size` over a user's records.
    /// Default implementation scans [`list_for_user`](Self::list_for_user).
    async fn total_size(&self, user_id: &str) -> Result<u64, StorageError> {
        Ok(self.list_for_user(user_id).await?.iter().map(|r| r.size).sum())
    }

    /// Number of a user's records of one kind.
    async fn count_kind(&self, user_id: &str, kind: RecordKind) -> Result<u64, StorageError> {
        Ok(self
            .list_for_user(user_id)
            .await?
            .iter()
            .filter(|r| r.key.kind == kind)
            .count() as u64)
    }
}

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persist a new operation, assigning its FIFO sequence number.
    async fn insert_operation(&self, op: &SyncOperation) -> Result<SyncOperation, StorageError>;

    async fn get_operation(&self, id: &str) -> Result<Option<SyncOperation>, StorageError>;

    /// Overwrite a stored operation. Fails with [`StorageError::NotFound`] if it
    /// was deleted in the meantime.
    async fn update_operation(&self, op: &SyncOperation) -> Result<(), StorageError>;

    /// Delete the operation only while it is in `status`. Returns whether it was removed.
    async fn delete_operation_if(&self, id: &str, status: SyncStatus) -> Result<bool, StorageError>;

    /// A user's operations in enqueue order, optionally filtered by status.
    async fn operations_for_user(
        &self,
        user_id: &str,
        status: Option<SyncStatus>,
    ) -> Result<Vec<SyncOperation>, StorageError>;

    /// Distinct users with at least one pending operation.
    async fn users_with_pending(&self) -> Result<Vec<String>, StorageError>;

    async fn set_last_sync(&self, user_id: &str, at: i64) -> Result<(), StorageError>;

    async fn last_sync(&self, user_id: &str) -> Result<Option<i64>, StorageError>;
}

#[async_trait]
pub trait DiagnosticsStore: Send + Sync {
    async fn append_error(&self, entry: &ErrorEntry) -> Result<(), StorageError>;
    async fn append_event(&self, entry: &EventEntry) -> Result<(), StorageError>;

    /// Most recent errors first.
    async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorEntry>, StorageError>;

    /// A user's events, most recent first.
    async fn recent_events(&self, user_id: &str, limit: usize) -> Result<Vec<EventEntry>, StorageError>;
}

/// Metadata of a stored attachment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub record: RecordKey,
    pub name: String,
    pub quality: MediaQuality,
    pub size: u64,
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn list(&self, record: &RecordKey) -> Result<Vec<Attachment>, StorageError>;

    async fn put(
        &self,
        record: &RecordKey,
        name: &str,
        quality: MediaQuality,
        bytes: Vec<u8>,
    ) -> Result<Attachment, StorageError>;

    /// Remove an attachment, returning the bytes freed.
    async fn delete(&self, attachment_id: &str) -> Result<u64, StorageError>;
}
