// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-user storage and item-count quotas.
//!
//! The tracker is read-only: it aggregates the user's current usage and says
//! whether a write of a given size may go ahead. To keep check and write
//! atomic with respect to each other, callers hold the user's write guard
//! ([`QuotaTracker::lock_user`]) across both. Writes for different users
//! never contend.

use std::sync::Arc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use crate::config::OfflineConfig;
use crate::error::{OfflineError, QuotaKind};
use crate::metrics;
use crate::record::RecordKind;
use crate::storage::traits::OfflineDataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub max_storage_size: u64,
    pub max_recipes: u64,
}

impl From<&OfflineConfig> for QuotaLimits {
    fn from(config: &OfflineConfig) -> Self {
        Self {
            max_storage_size: config.max_storage_size,
            max_recipes: config.max_recipes,
        }
    }
}

/// Snapshot of a user's usage against their limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used_bytes: u64,
    pub recipe_count: u64,
    pub limits: QuotaLimits,
}

impl QuotaUsage {
    #[must_use]
    pub fn remaining_bytes(&self) -> u64 {
        self.limits.max_storage_size.saturating_sub(self.used_bytes)
    }
}

/// Per-user async mutexes, created on first use.
///
/// An entry is dropped again as soon as its last guard is released with no
/// other task waiting, so the table only holds users with a lock in flight.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of one user's critical section.
pub struct UserGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    user_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl UserLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: &str) -> UserGuard<'_> {
        let lock = self.locks.entry(user_id.to_string()).or_default().clone();
        UserGuard {
            locks: &self.locks,
            user_id: user_id.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Users with a live entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        // One reference in the table, one in this guard. Anything more is a waiter.
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

pub struct QuotaTracker {
    store: Arc<dyn OfflineDataStore>,
    limits: RwLock<QuotaLimits>,
    write_locks: UserLocks,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn OfflineDataStore>, limits: QuotaLimits) -> Self {
        Self {
            store,
            limits: RwLock::new(limits),
            write_locks: UserLocks::new(),
        }
    }

    #[must_use]
    pub fn limits(&self) -> QuotaLimits {
        *self.limits.read()
    }

    pub fn set_limits(&self, limits: QuotaLimits) {
        *self.limits.write() = limits;
    }

    /// Serialize writes for one user. Hold the guard across check and write.
    ///
    /// Every mutation of a user's records (store, delete, access refresh,
    /// sync stamp, cleanup) runs under this guard.
    pub async fn lock_user(&self, user_id: &str) -> UserGuard<'_> {
        self.write_locks.lock(user_id).await
    }

    /// Users currently holding or waiting on a write guard
    #[must_use]
    pub fn locked_users(&self) -> usize {
        self.write_locks.len()
    }

    /// Check that a new record of `candidate_size` bytes fits.
    pub async fn check(
        &self,
        user_id: &str,
        kind: RecordKind,
        candidate_size: u64,
    ) -> Result<(), OfflineError> {
        self.check_replacement(user_id, kind, candidate_size, None).await
    }

    /// Check a write that may replace an existing record of `replaced_size` bytes.
    ///
    /// The replaced bytes are not counted twice, and replacing a recipe does not
    /// count against the item limit.
    pub async fn check_replacement(
        &self,
        user_id: &str,
        kind: RecordKind,
        candidate_size: u64,
        replaced_size: Option<u64>,
    ) -> Result<(), OfflineError> {
        let limits = self.limits();

        let total = self.store.total_size(user_id).await?;
        let used = total.saturating_sub(replaced_size.unwrap_or(0));
        if used.saturating_add(candidate_size) > limits.max_storage_size {
            metrics::record_quota_rejection("storage");
            return Err(OfflineError::QuotaExceeded(QuotaKind::Storage {
                used,
                requested: candidate_size,
                limit: limits.max_storage_size,
            }));
        }

        if kind == RecordKind::Recipe && replaced_size.is_none() {
            let count = self.store.count_kind(user_id, RecordKind::Recipe).await?;
            if count >= limits.max_recipes {
                metrics::record_quota_rejection("item_count");
                return Err(OfflineError::QuotaExceeded(QuotaKind::ItemCount {
                    count,
                    limit: limits.max_recipes,
                }));
            }
        }

        debug!(user_id, %kind, used, candidate_size, "Quota check passed");
        Ok(())
    }

    pub async fn usage(&self, user_id: &str) -> Result<QuotaUsage, OfflineError> {
        Ok(QuotaUsage {
            used_bytes: self.store.total_size(user_id).await?,
            recipe_count: self.store.count_kind(user_id, RecordKind::Recipe).await?,
            limits: self.limits(),
        })
    }
}
