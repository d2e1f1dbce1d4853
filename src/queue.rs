// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable per-user FIFO of pending sync intents.

use std::sync::Arc;
use tracing::debug;
use crate::error::OfflineError;
use crate::operation::{SyncOpKind, SyncOperation, SyncStatus};
use crate::storage::traits::OperationStore;

pub struct SyncQueue {
    store: Arc<dyn OperationStore>,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        Self { store }
    }

    /// Append a `pending` operation behind the user's existing ones.
    pub async fn enqueue(
        &self,
        user_id: &str,
        kind: SyncOpKind,
        recipe_id: &str,
    ) -> Result<SyncOperation, OfflineError> {
        let op = self
            .store
            .insert_operation(&SyncOperation::new(user_id, kind, recipe_id))
            .await?;
        debug!(user_id, op_id = %op.id, %kind, recipe_id, seq = op.seq, "Sync operation enqueued");
        Ok(op)
    }

    pub async fn get(&self, op_id: &str) -> Result<Option<SyncOperation>, OfflineError> {
        Ok(self.store.get_operation(op_id).await?)
    }

    /// Operations the processor will pick up next, in order.
    pub async fn pending(&self, user_id: &str) -> Result<Vec<SyncOperation>, OfflineError> {
        Ok(self.store.operations_for_user(user_id, Some(SyncStatus::Pending)).await?)
    }

    /// Operations that exhausted their retries. They are never retried
    /// automatically; enqueue a new operation instead.
    pub async fn failed(&self, user_id: &str) -> Result<Vec<SyncOperation>, OfflineError> {
        Ok(self.store.operations_for_user(user_id, Some(SyncStatus::Failed)).await?)
    }

    pub async fn operations(&self, user_id: &str) -> Result<Vec<SyncOperation>, OfflineError> {
        Ok(self.store.operations_for_user(user_id, None).await?)
    }

    /// Remove an operation before the processor starts it.
    ///
    /// Only `pending` operations can be cancelled; one already `in_progress`
    /// runs to completion or failure.
    pub async fn cancel(&self, op_id: &str) -> Result<(), OfflineError> {
        if self.store.delete_operation_if(op_id, SyncStatus::Pending).await? {
            debug!(op_id, "Sync operation cancelled");
            return Ok(());
        }
        match self.store.get_operation(op_id).await? {
            Some(op) => Err(OfflineError::InvalidTransition {
                from: op.status.to_string(),
                to: "cancelled".to_string(),
            }),
            None => Err(OfflineError::OperationNotFound(op_id.to_string())),
        }
    }
}
