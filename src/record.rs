// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline record data structure.
//!
//! An [`OfflineRecord`] is one cached blob of application data, identified by
//! the composite key `(user_id, kind, data_id)`. The payload is opaque JSON;
//! the engine only looks inside it to find the `favorite` flag during cleanup.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current wall-clock time in epoch millis.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Kind of application data held by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Recipe,
    Collection,
    List,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [Self::Recipe, Self::Collection, Self::List];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recipe => "recipe",
            Self::Collection => "collection",
            Self::List => "list",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recipe" => Some(Self::Recipe),
            "collection" => Some(Self::Collection),
            "list" => Some(Self::List),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of an offline record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub user_id: String,
    pub kind: RecordKind,
    pub data_id: String,
}

impl RecordKey {
    pub fn new(user_id: impl Into<String>, kind: RecordKind, data_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            data_id: data_id.into(),
        }
    }

    /// Flat string form, `user/kind/data_id`. Used as a map key and for attachment lookups.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}/{}/{}", self.user_id, self.kind, self.data_id)
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.user_id, self.kind, self.data_id)
    }
}

/// A cached copy of application data.
///
/// # Example
///
/// ```
/// use offline_sync::{OfflineRecord, RecordKey, RecordKind};
/// use serde_json::json;
///
/// let key = RecordKey::new("alice", RecordKind::Recipe, "r-1");
/// let record = OfflineRecord::new(key, json!({"title": "Soup"})).unwrap();
///
/// assert_eq!(record.size, serde_json::to_vec(&record.data).unwrap().len() as u64);
/// assert!(!record.is_dirty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub key: RecordKey,
    /// Opaque payload
    pub data: Value,
    /// Write timestamp (epoch millis), advances on every write
    pub version: i64,
    /// Serialized byte length of `data` at write time
    pub size: u64,
    pub last_modified: i64,
    pub last_synced: i64,
    pub last_accessed: i64,
}

impl OfflineRecord {
    /// Build a fresh record stamped with the current time.
    pub fn new(key: RecordKey, data: Value) -> Result<Self, serde_json::Error> {
        let size = payload_size(&data)?;
        let now = now_millis();
        Ok(Self {
            key,
            data,
            version: now,
            size,
            last_modified: now,
            last_synced: now,
            last_accessed: now,
        })
    }

    /// Local changes not yet reconciled with the origin.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.last_modified > self.last_synced
    }

    /// Whether the payload carries a truthy `favorite` / `isFavorite` flag.
    #[must_use]
    pub fn is_favorite(&self) -> bool {
        ["favorite", "isFavorite", "is_favorite"]
            .iter()
            .any(|field| self.data.get(field).and_then(Value::as_bool).unwrap_or(false))
    }
}

/// Serialized byte length of a payload.
pub fn payload_size(data: &Value) -> Result<u64, serde_json::Error> {
    Ok(serde_json::to_vec(data)?.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("video"), None);
    }

    #[test]
    fn test_size_matches_serialized_payload() {
        let data = json!({"title": "Bread", "steps": ["mix", "bake"]});
        let expected = serde_json::to_string(&data).unwrap().len() as u64;
        let record = OfflineRecord::new(RecordKey::new("u", RecordKind::Recipe, "1"), data).unwrap();
        assert_eq!(record.size, expected);
    }

    #[test]
    fn test_dirty_when_modified_after_sync() {
        let mut record =
            OfflineRecord::new(RecordKey::new("u", RecordKind::List, "1"), json!({})).unwrap();
        assert!(!record.is_dirty());

        record.last_modified = record.last_synced + 1;
        assert!(record.is_dirty());
    }

    #[test]
    fn test_favorite_flag_variants() {
        let key = RecordKey::new("u", RecordKind::Recipe, "1");
        let fav = OfflineRecord::new(key.clone(), json!({"favorite": true})).unwrap();
        let camel = OfflineRecord::new(key.clone(), json!({"isFavorite": true})).unwrap();
        let not = OfflineRecord::new(key.clone(), json!({"favorite": "yes"})).unwrap();
        let plain = OfflineRecord::new(key, json!({"title": "x"})).unwrap();

        assert!(fav.is_favorite());
        assert!(camel.is_favorite());
        assert!(!not.is_favorite());
        assert!(!plain.is_favorite());
    }

    #[test]
    fn test_storage_key_format() {
        let key = RecordKey::new("alice", RecordKind::Collection, "c-9");
        assert_eq!(key.storage_key(), "alice/collection/c-9");
        assert_eq!(key.to_string(), "alice:collection:c-9");
    }
}
