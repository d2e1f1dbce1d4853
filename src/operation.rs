// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync operation records and their state machine.
//!
//! ```text
//! pending → in_progress → completed
//!              │
//!              ├→ pending   (retryable failure, retry_count += 1)
//!              └→ failed    (retry budget exhausted or rejected)
//! ```

use serde::{Deserialize, Serialize};
use crate::error::OfflineError;
use crate::record::{now_millis, RecordKey, RecordKind};

/// What a queued operation asks the transport to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOpKind {
    Upload,
    Download,
    Delete,
}

impl SyncOpKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "download" => Some(Self::Download),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states are never left again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued intent to reconcile one item with the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub user_id: String,
    pub kind: SyncOpKind,
    /// Target of the operation. Sync operations always address a
    /// [`RecordKind::Recipe`] record; collections and lists are local only.
    pub recipe_id: String,
    pub status: SyncStatus,
    pub retry_count: u32,
    /// Last failure reason
    pub error: Option<String>,
    /// Enqueue time (epoch millis)
    pub timestamp: i64,
    /// Monotonic per-store sequence, breaks timestamp ties so FIFO holds
    pub seq: u64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl SyncOperation {
    pub fn new(user_id: impl Into<String>, kind: SyncOpKind, recipe_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            recipe_id: recipe_id.into(),
            status: SyncStatus::Pending,
            retry_count: 0,
            error: None,
            timestamp: now_millis(),
            seq: 0,
            started_at: None,
            completed_at: None,
        }
    }

    /// Key of the offline record this operation targets.
    #[must_use]
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(&self.user_id, RecordKind::Recipe, &self.recipe_id)
    }

    fn transition(&mut self, from: SyncStatus, to: SyncStatus) -> Result<(), OfflineError> {
        if self.status != from {
            return Err(OfflineError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// `pending → in_progress`
    pub fn start(&mut self) -> Result<(), OfflineError> {
        self.transition(SyncStatus::Pending, SyncStatus::InProgress)?;
        self.started_at = Some(now_millis());
        Ok(())
    }

    /// `in_progress → completed`
    pub fn complete(&mut self) -> Result<(), OfflineError> {
        self.transition(SyncStatus::InProgress, SyncStatus::Completed)?;
        self.completed_at = Some(now_millis());
        Ok(())
    }

    /// `in_progress → pending`, consuming one retry.
    pub fn requeue(&mut self, error: impl Into<String>) -> Result<(), OfflineError> {
        self.transition(SyncStatus::InProgress, SyncStatus::Pending)?;
        self.retry_count += 1;
        self.error = Some(error.into());
        Ok(())
    }

    /// `in_progress → failed`
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), OfflineError> {
        self.transition(SyncStatus::InProgress, SyncStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(now_millis());
        Ok(())
    }

    /// `in_progress → pending` without consuming a retry (crash recovery).
    pub fn reset_stalled(&mut self) -> Result<(), OfflineError> {
        self.transition(SyncStatus::InProgress, SyncStatus::Pending)?;
        self.started_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_operation_is_pending() {
        let op = SyncOperation::new("u", SyncOpKind::Upload, "r-1");
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.error.is_none());
        assert!(!op.id.is_empty());
    }

    #[test]
    fn test_success_path() {
        let mut op = SyncOperation::new("u", SyncOpKind::Download, "r-1");
        op.start().unwrap();
        assert_eq!(op.status, SyncStatus::InProgress);
        assert!(op.started_at.is_some());

        op.complete().unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
        assert!(op.completed_at.is_some());
    }

    #[test]
    fn test_requeue_increments_retry_count() {
        let mut op = SyncOperation::new("u", SyncOpKind::Upload, "r-1");
        op.start().unwrap();
        op.requeue("timeout").unwrap();

        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_cannot_complete_pending() {
        let mut op = SyncOperation::new("u", SyncOpKind::Delete, "r-1");
        let err = op.complete().unwrap_err();
        assert!(matches!(err, OfflineError::InvalidTransition { .. }));
        assert_eq!(op.status, SyncStatus::Pending);
    }

    #[test]
    fn test_terminal_states_stay_terminal() {
        let mut op = SyncOperation::new("u", SyncOpKind::Upload, "r-1");
        op.start().unwrap();
        op.fail("gone").unwrap();

        assert!(op.status.is_terminal());
        assert!(op.start().is_err());
    }

    #[test]
    fn test_reset_stalled_keeps_retry_count() {
        let mut op = SyncOperation::new("u", SyncOpKind::Upload, "r-1");
        op.retry_count = 2;
        op.start().unwrap();
        op.reset_stalled().unwrap();

        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.retry_count, 2);
        assert!(op.started_at.is_none());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SyncStatus::InProgress.to_string(), "in_progress");
        assert_eq!(SyncStatus::parse("failed"), Some(SyncStatus::Failed));
        assert_eq!(SyncOpKind::parse("upload"), Some(SyncOpKind::Upload));
        assert_eq!(SyncOpKind::parse("sideload"), None);
    }
}
