// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Offline Sync
//!
//! Offline availability and synchronization engine: lets a client cache
//! application data locally under per-user quotas, queues and retries
//! synchronization with the origin, and reclaims stale storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       OfflineEngine                         │
//! │  • Constructor-injected stores, transport and source        │
//! │  • Stats, runtime config updates, auto-sync loop            │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                      │
//!        ▼                     ▼                      ▼
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────────┐
//! │ QuotaTracker │   │ SyncQueue         │   │ CleanupSweeper   │
//! │      ↓       │   │      ↓            │   │ BulkDownloadJob  │
//! │ RecordManager│   │ SyncProcessor     │   │                  │
//! │              │   │  (retry+backoff)  │   │                  │
//! └──────────────┘   └───────────────────┘   └──────────────────┘
//!        │                     │                      │
//!        └─────────────────────┼──────────────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Store traits: records, operations, diagnostics, files     │
//! │   InMemoryStore (DashMap)  ·  SqlStore (SQLite / MySQL)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offline_sync::{
//!     OfflineConfig, OfflineEngine, OfflineStores, RecordKind, SyncOpKind,
//!     SyncOperation, SyncTransport, TransportError,
//! };
//! # use offline_sync::{RecipeSource, MediaQuality, AttachmentBlob};
//! use async_trait::async_trait;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct HttpTransport;
//!
//! #[async_trait]
//! impl SyncTransport for HttpTransport {
//!     async fn upload(&self, _op: &SyncOperation) -> Result<(), TransportError> { Ok(()) }
//!     async fn download(&self, _op: &SyncOperation) -> Result<(), TransportError> { Ok(()) }
//!     async fn delete(&self, _op: &SyncOperation) -> Result<(), TransportError> { Ok(()) }
//! }
//! # struct Origin;
//! # #[async_trait]
//! # impl RecipeSource for Origin {
//! #     async fn fetch_recipe(&self, _id: &str) -> Result<Option<serde_json::Value>, TransportError> { Ok(None) }
//! #     async fn fetch_attachments(&self, _id: &str, _q: MediaQuality) -> Result<Vec<AttachmentBlob>, TransportError> { Ok(vec![]) }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = OfflineEngine::new(
//!         OfflineConfig::default(),
//!         OfflineStores::in_memory(),
//!         Arc::new(HttpTransport),
//!         Arc::new(Origin),
//!     );
//!
//!     engine.store("alice", RecordKind::Recipe, "r1", json!({"title": "Soup"})).await.unwrap();
//!     engine.enqueue("alice", SyncOpKind::Upload, "r1").await.unwrap();
//!
//!     let summary = engine.drain("alice").await.unwrap();
//!     println!("completed {} operations", summary.completed);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: The [`OfflineEngine`] facade
//! - [`quota`], [`manager`]: Quota-checked record writes
//! - [`queue`], [`processor`]: Sync queue and bounded-retry processor
//! - [`cleanup`], [`download`]: Storage reclamation and bulk download
//! - [`diagnostics`]: Persisted error and event log
//! - [`storage`]: Store traits and the memory / SQL backends
//! - [`resilience`]: Retry with exponential backoff and jitter

pub mod config;
pub mod error;
pub mod record;
pub mod operation;
pub mod storage;
pub mod resilience;
pub mod quota;
pub mod manager;
pub mod queue;
pub mod processor;
pub mod cleanup;
pub mod download;
pub mod diagnostics;
pub mod engine;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{OfflineConfig, MediaQuality, ConflictResolution};
pub use error::{OfflineError, QuotaKind, TransportError};
pub use record::{OfflineRecord, RecordKey, RecordKind};
pub use operation::{SyncOperation, SyncOpKind, SyncStatus};
pub use storage::traits::{
    Attachment, AttachmentStore, DiagnosticsStore, OfflineDataStore, OperationStore, StorageError,
};
pub use storage::memory::InMemoryStore;
pub use storage::sql::SqlStore;
pub use quota::{QuotaLimits, QuotaTracker, QuotaUsage};
pub use manager::OfflineRecordManager;
pub use queue::SyncQueue;
pub use processor::{DrainSummary, SyncProcessor, SyncTransport};
pub use cleanup::{CleanupFailure, CleanupOptions, CleanupResult, CleanupSweeper};
pub use download::{AttachmentBlob, BulkDownloadJob, DownloadFailure, DownloadOptions, DownloadResult, RecipeSource};
pub use diagnostics::{DiagnosticsLog, ErrorEntry, EventEntry, EventStatus, EventType};
pub use engine::{OfflineEngine, OfflineStats, OfflineStores};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
