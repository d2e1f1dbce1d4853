//! End-to-end scenarios through [`OfflineEngine`] on the in-memory backend.
//!
//! # Running Tests
//! ```bash
//! cargo test --test scenarios
//! RUST_LOG=offline_sync=debug cargo test --test scenarios -- --nocapture
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use offline_sync::record::now_millis;
use offline_sync::{
    AttachmentBlob, AttachmentStore, CleanupOptions, DownloadOptions, InMemoryStore, MediaQuality,
    OfflineConfig, OfflineDataStore, OfflineEngine, OfflineError, OfflineRecord, OfflineStores,
    QuotaKind, RecipeSource, RecordKey, RecordKind, SyncOpKind, SyncOperation, SyncStatus,
    SyncTransport, TransportError,
};

const MIB: u64 = 1024 * 1024;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Fakes
// =============================================================================

/// Transport that fails every call while `failing` is set.
struct CountingTransport {
    calls: AtomicUsize,
    failing: bool,
}

impl CountingTransport {
    fn new(failing: bool) -> Self {
        Self { calls: AtomicUsize::new(0), failing }
    }

    fn respond(&self) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            Err(TransportError::Unavailable("origin timed out".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SyncTransport for CountingTransport {
    async fn upload(&self, _op: &SyncOperation) -> Result<(), TransportError> {
        self.respond()
    }
    async fn download(&self, _op: &SyncOperation) -> Result<(), TransportError> {
        self.respond()
    }
    async fn delete(&self, _op: &SyncOperation) -> Result<(), TransportError> {
        self.respond()
    }
}

#[derive(Default)]
struct FakeOrigin {
    recipes: HashMap<String, Value>,
    broken: HashSet<String>,
}

#[async_trait]
impl RecipeSource for FakeOrigin {
    async fn fetch_recipe(&self, recipe_id: &str) -> Result<Option<Value>, TransportError> {
        if self.broken.contains(recipe_id) {
            return Err(TransportError::Rejected("403 forbidden".into()));
        }
        Ok(self.recipes.get(recipe_id).cloned())
    }

    async fn fetch_attachments(
        &self,
        recipe_id: &str,
        quality: MediaQuality,
    ) -> Result<Vec<AttachmentBlob>, TransportError> {
        Ok(vec![AttachmentBlob {
            name: format!("{}-{}.jpg", recipe_id, quality.as_str()),
            bytes: vec![0; 64],
        }])
    }
}

fn fast_retry_config() -> OfflineConfig {
    OfflineConfig {
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 5,
        retry_jitter: 0.0,
        ..Default::default()
    }
}

struct Setup {
    store: Arc<InMemoryStore>,
    transport: Arc<CountingTransport>,
    engine: OfflineEngine,
}

fn setup(config: OfflineConfig, transport: CountingTransport, origin: FakeOrigin) -> Setup {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(transport);
    let engine = OfflineEngine::new(
        config,
        OfflineStores::shared(store.clone()),
        transport.clone(),
        Arc::new(origin),
    );
    Setup { store, transport, engine }
}

// =============================================================================
// Quota
// =============================================================================

#[tokio::test]
async fn quota_rejection_leaves_usage_unchanged() {
    let s = setup(fast_retry_config(), CountingTransport::new(false), FakeOrigin::default());

    // A record accounted at 1023 MiB without materializing the payload
    let mut big = OfflineRecord::new(RecordKey::new("u", RecordKind::Collection, "bulk"), json!({})).unwrap();
    big.size = 1023 * MIB;
    s.store.upsert(&big).await.unwrap();

    let payload = json!({ "blob": "x".repeat(2 * MIB as usize) });
    let err = s.engine.store("u", RecordKind::Recipe, "big", payload).await.unwrap_err();

    assert!(matches!(
        err,
        OfflineError::QuotaExceeded(QuotaKind::Storage { used, limit, .. })
            if used == 1023 * MIB && limit == 1024 * MIB
    ));
    assert_eq!(s.engine.total_size("u").await.unwrap(), 1023 * MIB);
    assert!(s.engine.get("u", RecordKind::Recipe, "big").await.unwrap().is_none());
}

#[tokio::test]
async fn item_count_rejection_at_limit() {
    let s = setup(fast_retry_config(), CountingTransport::new(false), FakeOrigin::default());

    for i in 0..100 {
        s.engine
            .store("u", RecordKind::Recipe, &format!("r{}", i), json!({"n": i}))
            .await
            .unwrap();
    }

    let err = s.engine.store("u", RecordKind::Recipe, "r100", json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        OfflineError::QuotaExceeded(QuotaKind::ItemCount { count: 100, limit: 100 })
    ));

    // Other kinds and rewrites of existing recipes are still accepted
    s.engine.store("u", RecordKind::List, "groceries", json!([])).await.unwrap();
    s.engine.store("u", RecordKind::Recipe, "r0", json!({"n": "updated"})).await.unwrap();
    assert_eq!(s.engine.stats("u").await.unwrap().record_counts[&RecordKind::Recipe], 100);
}

#[tokio::test]
async fn idempotent_upsert_advances_version() {
    let s = setup(fast_retry_config(), CountingTransport::new(false), FakeOrigin::default());

    let first = s.engine.store("u", RecordKind::Recipe, "r1", json!({"t": 1})).await.unwrap();
    let second = s.engine.store("u", RecordKind::Recipe, "r1", json!({"t": 1})).await.unwrap();

    assert_eq!(s.store.record_count(), 1);
    assert!(second.version > first.version);
    assert!(second.last_modified > first.last_modified);
    assert_eq!(second.last_synced, first.last_synced);
    assert_eq!(s.engine.total_size("u").await.unwrap(), second.size);
}

// =============================================================================
// Sync
// =============================================================================

#[tokio::test]
async fn bounded_retry_fails_after_retry_attempts() {
    let s = setup(fast_retry_config(), CountingTransport::new(true), FakeOrigin::default());

    let op = s.engine.enqueue("u", SyncOpKind::Upload, "r1").await.unwrap();
    let summary = s.engine.drain("u").await.unwrap();

    let op = s.engine.operation(&op.id).await.unwrap().unwrap();
    assert_eq!(op.status, SyncStatus::Failed);
    assert_eq!(op.retry_count, 3);
    assert!(op.error.as_deref().unwrap_or_default().contains("origin timed out"));
    assert_eq!(s.transport.calls.load(Ordering::SeqCst), 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retries, 3);

    let errors = s.engine.recent_errors(10).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].recipe_id.as_deref(), Some("r1"));

    // Failed operations are not picked up again
    s.engine.drain("u").await.unwrap();
    assert_eq!(s.transport.calls.load(Ordering::SeqCst), 4);
    assert_eq!(s.engine.failed_operations("u").await.unwrap().len(), 1);
}

#[tokio::test]
async fn upload_clears_dirty_flag() {
    let s = setup(fast_retry_config(), CountingTransport::new(false), FakeOrigin::default());

    s.engine.store("u", RecordKind::Recipe, "r1", json!({"v": 1})).await.unwrap();
    s.engine.store("u", RecordKind::Recipe, "r1", json!({"v": 2})).await.unwrap();
    assert_eq!(s.engine.dirty_records("u").await.unwrap().len(), 1);

    s.engine.enqueue("u", SyncOpKind::Upload, "r1").await.unwrap();
    let summary = s.engine.drain("u").await.unwrap();

    assert_eq!(summary.completed, 1);
    assert!(s.engine.dirty_records("u").await.unwrap().is_empty());
    let stats = s.engine.stats("u").await.unwrap();
    assert!(stats.last_sync.is_some());
    assert_eq!(stats.pending_operations, 0);
}

// =============================================================================
// Cleanup
// =============================================================================

#[tokio::test]
async fn selective_cleanup_keeps_favorites() {
    let s = setup(fast_retry_config(), CountingTransport::new(false), FakeOrigin::default());

    for i in 0..5 {
        let favorite = i < 2;
        s.engine
            .store("u", RecordKind::Recipe, &format!("r{}", i), json!({"favorite": favorite}))
            .await
            .unwrap();
    }
    let cutoff = now_millis() + 1_000;

    let result = s
        .engine
        .cleanup("u", &CleanupOptions { older_than: Some(cutoff), exclude_favorites: true, dry_run: false })
        .await
        .unwrap();

    let mut removed: Vec<&str> = result.removed_records.iter().map(|k| k.data_id.as_str()).collect();
    removed.sort_unstable();
    assert_eq!(removed, vec!["r2", "r3", "r4"]);
    assert!(s.engine.get("u", RecordKind::Recipe, "r0").await.unwrap().is_some());
    assert!(s.engine.get("u", RecordKind::Recipe, "r1").await.unwrap().is_some());
    assert_eq!(s.store.record_count(), 2);
}

#[tokio::test]
async fn dry_run_cleanup_is_pure() {
    let s = setup(fast_retry_config(), CountingTransport::new(false), FakeOrigin::default());

    let rec = s.engine.store("u", RecordKind::Recipe, "r1", json!({"t": "soup"})).await.unwrap();
    s.store.put(&rec.key, "cover.jpg", MediaQuality::High, vec![1; 32]).await.unwrap();

    let options = CleanupOptions { older_than: None, exclude_favorites: false, dry_run: true };
    let first = s.engine.cleanup("u", &options).await.unwrap();
    let second = s.engine.cleanup("u", &options).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.space_freed, 32);
    assert_eq!(first.record_bytes_freed, rec.size);
    assert_eq!(s.store.record_count(), 1);
    assert_eq!(s.store.attachment_count(), 1);
}

// =============================================================================
// Download
// =============================================================================

#[tokio::test]
async fn download_partial_failure_covers_every_existing_id() {
    let mut origin = FakeOrigin::default();
    for id in ["a", "b", "c", "d"] {
        origin.recipes.insert(id.to_string(), json!({"id": id}));
    }
    origin.broken.insert("c".to_string());
    let s = setup(fast_retry_config(), CountingTransport::new(false), origin);

    let requested = ["a", "b", "c", "d", "gone"];
    let result = s
        .engine
        .download("u", &DownloadOptions::new(requested).with_attachments(MediaQuality::Medium))
        .await;

    let existing_upstream = 4;
    assert_eq!(result.successful.len() + result.failed.len(), existing_upstream);
    assert_eq!(result.failed[0].recipe_id, "c");
    assert_eq!(result.missing, vec!["gone"]);
    assert_eq!(s.store.attachment_count(), 3);
    assert!(result.total_bytes >= 3 * 64);

    let errors = s.engine.recent_errors(10).await.unwrap();
    assert_eq!(errors.len(), 1);
    let events = s.engine.recent_events("u", 10).await.unwrap();
    assert_eq!(events.len(), 1);
}
