// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine-facing error type.

use thiserror::Error;
use crate::storage::traits::StorageError;

/// Which ceiling a rejected write would have crossed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaKind {
    /// Total cached bytes
    Storage { used: u64, requested: u64, limit: u64 },
    /// Number of cached recipes
    ItemCount { count: u64, limit: u64 },
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage { used, requested, limit } => write!(
                f,
                "storage: {} bytes used + {} requested exceeds {} bytes",
                used, requested, limit
            ),
            Self::ItemCount { count, limit } => {
                write!(f, "item count: {} recipes already cached (max {})", count, limit)
            }
        }
    }
}

/// Failure reported by the transport or upstream source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Origin unreachable or timed out; worth retrying
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    /// Origin refused the operation; retrying will not help
    #[error("rejected by origin: {0}")]
    Rejected(String),
}

impl TransportError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Quota exceeded ({0})")]
    QuotaExceeded(QuotaKind),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Sync operation not found: {0}")]
    OperationNotFound(String),
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl OfflineError {
    /// Short stable code, used as a metrics label and diagnostics code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::QuotaExceeded(QuotaKind::Storage { .. }) => "QUOTA_STORAGE",
            Self::QuotaExceeded(QuotaKind::ItemCount { .. }) => "QUOTA_ITEM_COUNT",
            Self::Storage(_) => "STORAGE",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Transport(_) => "TRANSPORT",
            Self::OperationNotFound(_) => "OPERATION_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message_names_limit() {
        let err = OfflineError::QuotaExceeded(QuotaKind::ItemCount { count: 100, limit: 100 });
        let msg = err.to_string();
        assert!(msg.contains("item count"));
        assert!(msg.contains("max 100"));
        assert_eq!(err.code(), "QUOTA_ITEM_COUNT");
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(TransportError::Unavailable("timeout".into()).is_retryable());
        assert!(!TransportError::Rejected("forbidden".into()).is_retryable());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: OfflineError = StorageError::Backend("down".into()).into();
        assert_eq!(err.code(), "STORAGE");
        assert!(err.to_string().contains("down"));
    }
}
