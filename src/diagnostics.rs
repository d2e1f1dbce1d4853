// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Append-only diagnostics: persisted error and event entries.
//!
//! Every entry is also emitted through `tracing` and counted in `metrics`.
//! Writing a diagnostics entry never fails the operation that produced it.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use crate::metrics;
use crate::record::now_millis;
use crate::storage::traits::{DiagnosticsStore, StorageError};

/// Row of `offline_errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: String,
    pub code: String,
    pub message: String,
    pub recipe_id: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sync,
    Cleanup,
    Download,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Cleanup => "cleanup",
            Self::Download => "download",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "cleanup" => Some(Self::Cleanup),
            "download" => Some(Self::Download),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    /// Some items in the batch failed
    Partial,
    Failure,
}

impl EventStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    /// Classify a batch outcome.
    #[must_use]
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failure,
            _ => Self::Partial,
        }
    }
}

/// Row of `offline_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: String,
    pub user_id: String,
    pub event_type: EventType,
    pub status: EventStatus,
    pub message: String,
    pub details: Value,
    pub timestamp: i64,
}

/// Error codes written to `offline_errors`.
pub mod codes {
    pub const SYNC_FAILED: &str = "SYNC_FAILED";
    pub const DOWNLOAD_FAILED: &str = "DOWNLOAD_FAILED";
    pub const CLEANUP_ATTACHMENT_FAILED: &str = "CLEANUP_ATTACHMENT_FAILED";
}

pub struct DiagnosticsLog {
    store: Arc<dyn DiagnosticsStore>,
}

impl DiagnosticsLog {
    pub fn new(store: Arc<dyn DiagnosticsStore>) -> Self {
        Self { store }
    }

    /// Record an error entry.
    pub async fn error(&self, code: &str, message: impl Into<String>, recipe_id: Option<&str>) {
        let entry = ErrorEntry {
            id: uuid::Uuid::new_v4().to_string(),
            code: code.to_string(),
            message: message.into(),
            recipe_id: recipe_id.map(str::to_string),
            timestamp: now_millis(),
        };

        error!(code, recipe_id = ?entry.recipe_id, message = %entry.message, "Offline error");
        metrics::record_error(code);

        if let Err(e) = self.store.append_error(&entry).await {
            warn!(code, error = %e, "Failed to persist error entry");
        }
    }

    /// Record an event entry.
    pub async fn event(
        &self,
        user_id: &str,
        event_type: EventType,
        status: EventStatus,
        message: impl Into<String>,
        details: Value,
    ) {
        let entry = EventEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            event_type,
            status,
            message: message.into(),
            details,
            timestamp: now_millis(),
        };

        info!(
            user_id,
            event = event_type.as_str(),
            status = status.as_str(),
            message = %entry.message,
            "Offline event"
        );

        if let Err(e) = self.store.append_event(&entry).await {
            warn!(user_id, error = %e, "Failed to persist event entry");
        }
    }

    pub async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorEntry>, StorageError> {
        self.store.recent_errors(limit).await
    }

    pub async fn recent_events(&self, user_id: &str, limit: usize) -> Result<Vec<EventEntry>, StorageError> {
        self.store.recent_events(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_status_from_counts() {
        assert_eq!(EventStatus::from_counts(3, 0), EventStatus::Success);
        assert_eq!(EventStatus::from_counts(0, 0), EventStatus::Success);
        assert_eq!(EventStatus::from_counts(0, 2), EventStatus::Failure);
        assert_eq!(EventStatus::from_counts(1, 1), EventStatus::Partial);
    }

    #[tokio::test]
    async fn test_error_is_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let log = DiagnosticsLog::new(store.clone());

        log.error(codes::SYNC_FAILED, "gave up", Some("r-1")).await;

        let errors = log.recent_errors(10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "SYNC_FAILED");
        assert_eq!(errors[0].recipe_id.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn test_events_are_scoped_per_user() {
        let store = Arc::new(InMemoryStore::new());
        let log = DiagnosticsLog::new(store);

        log.event("alice", EventType::Sync, EventStatus::Success, "synced", json!({"count": 2})).await;
        log.event("bob", EventType::Cleanup, EventStatus::Success, "swept", json!({})).await;

        let alice = log.recent_events("alice", 10).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].event_type, EventType::Sync);
        assert_eq!(alice[0].details["count"], 2);
    }
}
