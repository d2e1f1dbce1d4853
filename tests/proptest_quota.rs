//! Property-based tests for quota enforcement and upsert identity.
//!
//! Random write sequences are replayed against a fresh engine; after every
//! step the user's usage must sit within the configured ceilings.
//!
//! Run with: cargo test --test proptest_quota

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};

use offline_sync::{
    AttachmentBlob, MediaQuality, OfflineConfig, OfflineEngine, OfflineError, OfflineStores,
    RecipeSource, RecordKind, SyncOperation, SyncTransport, TransportError,
};

struct Idle;

#[async_trait]
impl SyncTransport for Idle {
    async fn upload(&self, _op: &SyncOperation) -> Result<(), TransportError> {
        Ok(())
    }
    async fn download(&self, _op: &SyncOperation) -> Result<(), TransportError> {
        Ok(())
    }
    async fn delete(&self, _op: &SyncOperation) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl RecipeSource for Idle {
    async fn fetch_recipe(&self, _recipe_id: &str) -> Result<Option<Value>, TransportError> {
        Ok(None)
    }
    async fn fetch_attachments(
        &self,
        _recipe_id: &str,
        _quality: MediaQuality,
    ) -> Result<Vec<AttachmentBlob>, TransportError> {
        Ok(vec![])
    }
}

fn engine(max_storage_size: u64, max_recipes: u64) -> OfflineEngine {
    OfflineEngine::new(
        OfflineConfig { max_storage_size, max_recipes, ..Default::default() },
        OfflineStores::in_memory(),
        Arc::new(Idle),
        Arc::new(Idle),
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Strategies
// =============================================================================

fn kind_strategy() -> impl Strategy<Value = RecordKind> {
    prop_oneof![
        3 => Just(RecordKind::Recipe),
        1 => Just(RecordKind::Collection),
        1 => Just(RecordKind::List),
    ]
}

/// (kind, data id drawn from a small pool so rewrites happen, payload length)
fn write_strategy() -> impl Strategy<Value = (RecordKind, u8, usize)> {
    (kind_strategy(), 0u8..12, 0usize..400)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Accepted writes never push usage past either ceiling.
    #[test]
    fn prop_quota_invariant_holds(
        writes in prop::collection::vec(write_strategy(), 1..60),
        max_storage_size in 200u64..4000,
        max_recipes in 1u64..8,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(max_storage_size, max_recipes);
            // Model of accepted records: (kind, id) -> size
            let mut model: HashMap<(RecordKind, u8), u64> = HashMap::new();

            for (kind, id, len) in writes {
                let data = json!({ "pad": "x".repeat(len) });
                match engine.store("u", kind, &format!("d{}", id), data).await {
                    Ok(record) => {
                        model.insert((kind, id), record.size);
                    }
                    Err(OfflineError::QuotaExceeded(_)) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }

                let total = engine.total_size("u").await.unwrap();
                let stats = engine.stats("u").await.unwrap();
                assert!(total <= max_storage_size, "total {} > limit {}", total, max_storage_size);
                assert!(stats.record_counts[&RecordKind::Recipe] <= max_recipes);
                assert_eq!(total, model.values().sum::<u64>());
            }
        });
    }

    /// Storing the same key twice never duplicates it and never changes usage
    /// when the payload is unchanged.
    #[test]
    fn prop_upsert_is_idempotent(
        kind in kind_strategy(),
        id in "[a-z0-9]{1,12}",
        text in ".{0,200}",
    ) {
        let rt = runtime();
        rt.block_on(async {
            let engine = engine(1024 * 1024, 10);
            let first = engine.store("u", kind, &id, json!({ "text": text.clone() })).await.unwrap();
            let second = engine.store("u", kind, &id, json!({ "text": text })).await.unwrap();

            let stats = engine.stats("u").await.unwrap();
            assert_eq!(stats.record_counts.values().sum::<u64>(), 1);
            assert_eq!(first.size, second.size);
            assert_eq!(engine.total_size("u").await.unwrap(), second.size);
            assert!(second.version > first.version);
        });
    }
}
