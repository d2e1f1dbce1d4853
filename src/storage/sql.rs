// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend (SQLite or MySQL) for durable offline state.
//!
//! Implements [`OfflineDataStore`], [`OperationStore`] and [`DiagnosticsStore`]
//! over a single `sqlx` `Any` pool:
//!
//! ```sql
//! CREATE TABLE offline_data (
//!   user_id, kind, data_id,   -- composite primary key
//!   data TEXT,                -- JSON payload
//!   version, size, last_modified, last_synced, last_accessed
//! );
//! CREATE TABLE sync_operations (seq AUTOINCREMENT, id UNIQUE, user_id, kind, recipe_id,
//!   status, retry_count, error, timestamp, started_at, completed_at);
//! CREATE TABLE offline_stats (user_id PRIMARY KEY, last_sync);
//! CREATE TABLE offline_errors (seq, id, code, message, recipe_id, timestamp);
//! CREATE TABLE offline_events (seq, id, user_id, event_type, status, message, details TEXT, timestamp);
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! JSON is kept in TEXT columns, and MySQL hands TEXT back as bytes through
//! the `Any` driver, so every text column is read as `String` first and then
//! as `Vec<u8>`. Unsigned values are stored as `BIGINT`.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{info, warn};
use crate::diagnostics::{ErrorEntry, EventEntry, EventStatus, EventType};
use crate::metrics::{self, LatencyTimer};
use crate::operation::{SyncOpKind, SyncOperation, SyncStatus};
use crate::record::{OfflineRecord, RecordKey, RecordKind};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{DiagnosticsStore, OfflineDataStore, OperationStore, StorageError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Read a text column, accepting MySQL's byte representation.
fn text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    row.try_get::<String, _>(column)
        .or_else(|_| {
            row.try_get::<Vec<u8>, _>(column)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .map_err(backend)
}

fn opt_text(row: &AnyRow, column: &str) -> Result<Option<String>, StorageError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(v) => Ok(v),
        Err(_) => Ok(row
            .try_get::<Option<Vec<u8>>, _>(column)
            .map_err(backend)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())),
    }
}

fn int(row: &AnyRow, column: &str) -> Result<i64, StorageError> {
    row.try_get::<i64, _>(column).map_err(backend)
}

fn decode_error(what: &str, value: &str) -> StorageError {
    StorageError::Serialization(format!("unknown {} '{}'", what, value))
}

const RECORD_COLUMNS: &str =
    "user_id, kind, data_id, data, version, size, last_modified, last_synced, last_accessed";

const OPERATION_COLUMNS: &str =
    "seq, id, user_id, kind, recipe_id, status, retry_count, error, timestamp, started_at, completed_at";

fn record_from_row(row: &AnyRow) -> Result<OfflineRecord, StorageError> {
    let kind = text(row, "kind")?;
    let data = text(row, "data")?;
    Ok(OfflineRecord {
        key: RecordKey::new(
            text(row, "user_id")?,
            RecordKind::parse(&kind).ok_or_else(|| decode_error("record kind", &kind))?,
            text(row, "data_id")?,
        ),
        data: serde_json::from_str(&data).map_err(|e| StorageError::Serialization(e.to_string()))?,
        version: int(row, "version")?,
        size: int(row, "size")? as u64,
        last_modified: int(row, "last_modified")?,
        last_synced: int(row, "last_synced")?,
        last_accessed: int(row, "last_accessed")?,
    })
}

fn operation_from_row(row: &AnyRow) -> Result<SyncOperation, StorageError> {
    let kind = text(row, "kind")?;
    let status = text(row, "status")?;
    Ok(SyncOperation {
        id: text(row, "id")?,
        user_id: text(row, "user_id")?,
        kind: SyncOpKind::parse(&kind).ok_or_else(|| decode_error("operation kind", &kind))?,
        recipe_id: text(row, "recipe_id")?,
        status: SyncStatus::parse(&status).ok_or_else(|| decode_error("operation status", &status))?,
        retry_count: int(row, "retry_count")? as u32,
        error: opt_text(row, "error")?,
        timestamp: int(row, "timestamp")?,
        seq: int(row, "seq")? as u64,
        started_at: row.try_get::<Option<i64>, _>("started_at").map_err(backend)?,
        completed_at: row.try_get::<Option<i64>, _>("completed_at").map_err(backend)?,
    })
}

fn event_from_row(row: &AnyRow) -> Result<EventEntry, StorageError> {
    let event_type = text(row, "event_type")?;
    let status = text(row, "status")?;
    let details = text(row, "details")?;
    Ok(EventEntry {
        id: text(row, "id")?,
        user_id: text(row, "user_id")?,
        event_type: EventType::parse(&event_type).ok_or_else(|| decode_error("event type", &event_type))?,
        status: EventStatus::parse(&status).ok_or_else(|| decode_error("event status", &status))?,
        message: text(row, "message")?,
        details: serde_json::from_str(&details).map_err(|e| StorageError::Serialization(e.to_string()))?,
        timestamp: int(row, "timestamp")?,
    })
}

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the tables if they do not exist.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");
        // Every connection to an in-memory SQLite database gets its own database
        let in_memory = is_sqlite && connection_string.contains(":memory:");
        let (max_connections, idle_timeout) = if in_memory {
            (1, None)
        } else {
            (10, Some(Duration::from_secs(300)))
        };

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .min_connections(if in_memory { 1 } else { 0 })
                .max_lifetime(idle_timeout.map(|t| t * 6))
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(idle_timeout)
                .connect(connection_string)
                .await
                .map_err(|e| {
                    metrics::record_connection_error("sql");
                    backend(e)
                })
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite && !in_memory {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        info!(sqlite = is_sqlite, "Offline SQL store ready");
        Ok(store)
    }

    /// Get a clone of the connection pool for sharing with other components.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    fn schema(&self) -> &'static [&'static str] {
        if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS offline_data (
                    user_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    data_id TEXT NOT NULL,
                    data TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    last_modified INTEGER NOT NULL,
                    last_synced INTEGER NOT NULL,
                    last_accessed INTEGER NOT NULL,
                    PRIMARY KEY (user_id, kind, data_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_operations (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    user_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    recipe_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    error TEXT,
                    timestamp INTEGER NOT NULL,
                    started_at INTEGER,
                    completed_at INTEGER
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_sync_operations_user_status ON sync_operations (user_id, status)",
                r#"
                CREATE TABLE IF NOT EXISTS offline_stats (
                    user_id TEXT PRIMARY KEY,
                    last_sync INTEGER NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS offline_errors (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL,
                    code TEXT NOT NULL,
                    message TEXT NOT NULL,
                    recipe_id TEXT,
                    timestamp INTEGER NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS offline_events (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    message TEXT NOT NULL,
                    details TEXT NOT NULL,
                    timestamp INTEGER NOT NULL
                )
                "#,
            ]
        } else {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS offline_data (
                    user_id VARCHAR(191) NOT NULL,
                    kind VARCHAR(16) NOT NULL,
                    data_id VARCHAR(191) NOT NULL,
                    data LONGTEXT NOT NULL,
                    version BIGINT NOT NULL,
                    size BIGINT NOT NULL,
                    last_modified BIGINT NOT NULL,
                    last_synced BIGINT NOT NULL,
                    last_accessed BIGINT NOT NULL,
                    PRIMARY KEY (user_id, kind, data_id),
                    INDEX idx_last_accessed (user_id, last_accessed)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_operations (
                    seq BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    id VARCHAR(64) NOT NULL UNIQUE,
                    user_id VARCHAR(191) NOT NULL,
                    kind VARCHAR(16) NOT NULL,
                    recipe_id VARCHAR(191) NOT NULL,
                    status VARCHAR(16) NOT NULL,
                    retry_count BIGINT NOT NULL DEFAULT 0,
                    error TEXT,
                    timestamp BIGINT NOT NULL,
                    started_at BIGINT,
                    completed_at BIGINT,
                    INDEX idx_user_status (user_id, status)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS offline_stats (
                    user_id VARCHAR(191) PRIMARY KEY,
                    last_sync BIGINT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS offline_errors (
                    seq BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    id VARCHAR(64) NOT NULL,
                    code VARCHAR(64) NOT NULL,
                    message TEXT NOT NULL,
                    recipe_id VARCHAR(191),
                    timestamp BIGINT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS offline_events (
                    seq BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    id VARCHAR(64) NOT NULL,
                    user_id VARCHAR(191) NOT NULL,
                    event_type VARCHAR(16) NOT NULL,
                    status VARCHAR(16) NOT NULL,
                    message TEXT NOT NULL,
                    details LONGTEXT NOT NULL,
                    timestamp BIGINT NOT NULL,
                    INDEX idx_user (user_id)
                )
                "#,
            ]
        }
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for &sql in self.schema() {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }
        Ok(())
    }

    async fn record_exists(&self, key: &RecordKey) -> Result<bool, StorageError> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM offline_data WHERE user_id = ? AND kind = ? AND data_id = ?",
        )
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .bind(&key.data_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.is_some())
    }

    async fn operation_exists(&self, id: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 AS present FROM sync_operations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl OfflineDataStore for SqlStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<OfflineRecord>, StorageError> {
        let _timer = LatencyTimer::new("sql", "get");
        let sql = format!(
            "SELECT {} FROM offline_data WHERE user_id = ? AND kind = ? AND data_id = ?",
            RECORD_COLUMNS
        );
        let row = retry("sql_get", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(&key.user_id)
                .bind(key.kind.as_str())
                .bind(&key.data_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &OfflineRecord) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("sql", "upsert");
        let data = serde_json::to_string(&record.data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let key = &record.key;

        if self.record_exists(key).await? {
            sqlx::query(
                "UPDATE offline_data SET data = ?, version = ?, size = ?, last_modified = ?, last_accessed = ? \
                 WHERE user_id = ? AND kind = ? AND data_id = ?",
            )
            .bind(&data)
            .bind(record.version)
            .bind(record.size as i64)
            .bind(record.last_modified)
            .bind(record.last_accessed)
            .bind(&key.user_id)
            .bind(key.kind.as_str())
            .bind(&key.data_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            return Ok(false);
        }

        let sql = format!(
            "INSERT INTO offline_data ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RECORD_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&key.user_id)
            .bind(key.kind.as_str())
            .bind(&key.data_id)
            .bind(&data)
            .bind(record.version)
            .bind(record.size as i64)
            .bind(record.last_modified)
            .bind(record.last_synced)
            .bind(record.last_accessed)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(true)
    }

    async fn delete(&self, key: &RecordKey) -> Result<bool, StorageError> {
        let _timer = LatencyTimer::new("sql", "delete");
        let result = retry("sql_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM offline_data WHERE user_id = ? AND kind = ? AND data_id = ?")
                .bind(&key.user_id)
                .bind(key.kind.as_str())
                .bind(&key.data_id)
                .execute(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<OfflineRecord>, StorageError> {
        let sql = format!("SELECT {} FROM offline_data WHERE user_id = ?", RECORD_COLUMNS);
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut records = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
        // Same order as RecordKey's Ord, which differs from the kind column's text order
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn touch(&self, key: &RecordKey, at: i64) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE offline_data SET last_accessed = ? WHERE user_id = ? AND kind = ? AND data_id = ?",
        )
        .bind(at)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .bind(&key.data_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn mark_synced(&self, key: &RecordKey, at: i64) -> Result<bool, StorageError> {
        if !self.record_exists(key).await? {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE offline_data SET last_synced = ? WHERE user_id = ? AND kind = ? AND data_id = ?",
        )
        .bind(at)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .bind(&key.data_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(true)
    }

    async fn total_size(&self, user_id: &str) -> Result<u64, StorageError> {
        // MySQL's SUM yields DECIMAL, which the Any driver cannot decode
        let sql = if self.is_sqlite {
            "SELECT COALESCE(SUM(size), 0) AS total FROM offline_data WHERE user_id = ?"
        } else {
            "SELECT CAST(COALESCE(SUM(size), 0) AS SIGNED) AS total FROM offline_data WHERE user_id = ?"
        };
        let row = sqlx::query(sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(int(&row, "total")? as u64)
    }

    async fn count_kind(&self, user_id: &str, kind: RecordKind) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM offline_data WHERE user_id = ? AND kind = ?")
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(int(&row, "cnt")? as u64)
    }
}

#[async_trait]
impl OperationStore for SqlStore {
    async fn insert_operation(&self, op: &SyncOperation) -> Result<SyncOperation, StorageError> {
        sqlx::query(
            "INSERT INTO sync_operations (id, user_id, kind, recipe_id, status, retry_count, error, timestamp, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&op.id)
        .bind(&op.user_id)
        .bind(op.kind.as_str())
        .bind(&op.recipe_id)
        .bind(op.status.as_str())
        .bind(op.retry_count as i64)
        .bind(&op.error)
        .bind(op.timestamp)
        .bind(op.started_at)
        .bind(op.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        self.get_operation(&op.id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_operation(&self, id: &str) -> Result<Option<SyncOperation>, StorageError> {
        let sql = format!("SELECT {} FROM sync_operations WHERE id = ?", OPERATION_COLUMNS);
        let row = retry("sql_get_operation", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        row.as_ref().map(operation_from_row).transpose()
    }

    async fn update_operation(&self, op: &SyncOperation) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE sync_operations SET status = ?, retry_count = ?, error = ?, started_at = ?, completed_at = ? \
             WHERE id = ?",
        )
        .bind(op.status.as_str())
        .bind(op.retry_count as i64)
        .bind(&op.error)
        .bind(op.started_at)
        .bind(op.completed_at)
        .bind(&op.id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // MySQL reports zero affected rows when nothing changed
        if result.rows_affected() == 0 && !self.operation_exists(&op.id).await? {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_operation_if(&self, id: &str, status: SyncStatus) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM sync_operations WHERE id = ? AND status = ?")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn operations_for_user(
        &self,
        user_id: &str,
        status: Option<SyncStatus>,
    ) -> Result<Vec<SyncOperation>, StorageError> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM sync_operations WHERE user_id = ? AND status = ? ORDER BY seq",
                    OPERATION_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM sync_operations WHERE user_id = ? ORDER BY seq",
                    OPERATION_COLUMNS
                );
                sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await
            }
        }
        .map_err(backend)?;

        rows.iter().map(operation_from_row).collect()
    }

    async fn users_with_pending(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            "SELECT DISTINCT user_id FROM sync_operations WHERE status = ? ORDER BY user_id",
        )
        .bind(SyncStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(|row| text(row, "user_id")).collect()
    }

    async fn set_last_sync(&self, user_id: &str, at: i64) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO offline_stats (user_id, last_sync) VALUES (?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET last_sync = excluded.last_sync"
        } else {
            "INSERT INTO offline_stats (user_id, last_sync) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE last_sync = VALUES(last_sync)"
        };
        sqlx::query(sql)
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn last_sync(&self, user_id: &str) -> Result<Option<i64>, StorageError> {
        let row = sqlx::query("SELECT last_sync FROM offline_stats WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(|r| int(r, "last_sync")).transpose()
    }
}

#[async_trait]
impl DiagnosticsStore for SqlStore {
    async fn append_error(&self, entry: &ErrorEntry) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO offline_errors (id, code, message, recipe_id, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.code)
        .bind(&entry.message)
        .bind(&entry.recipe_id)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn append_event(&self, entry: &EventEntry) -> Result<(), StorageError> {
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO offline_events (id, user_id, event_type, status, message, details, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(entry.event_type.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(&details)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorEntry>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, code, message, recipe_id, timestamp FROM offline_errors ORDER BY seq DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| {
                Ok(ErrorEntry {
                    id: text(row, "id")?,
                    code: text(row, "code")?,
                    message: text(row, "message")?,
                    recipe_id: opt_text(row, "recipe_id")?,
                    timestamp: int(row, "timestamp")?,
                })
            })
            .collect()
    }

    async fn recent_events(&self, user_id: &str, limit: usize) -> Result<Vec<EventEntry>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, user_id, event_type, status, message, details, timestamp FROM offline_events \
             WHERE user_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let events = rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>();
        if let Err(ref e) = events {
            warn!(user_id, error = %e, "Undecodable offline event row");
        }
        events
    }
}
