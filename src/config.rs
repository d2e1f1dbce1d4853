// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the offline engine.
//!
//! # Example
//!
//! ```
//! use offline_sync::{OfflineConfig, MediaQuality};
//!
//! // Minimal config (uses defaults)
//! let config = OfflineConfig::default();
//! assert_eq!(config.max_storage_size, 1024 * 1024 * 1024); // 1 GiB
//! assert_eq!(config.retry_attempts, 3);
//!
//! // Tighter limits for a free tier
//! let config = OfflineConfig {
//!     max_storage_size: 50 * 1024 * 1024,
//!     max_recipes: 20,
//!     media_quality: MediaQuality::Low,
//!     ..Default::default()
//! };
//! assert!(config.auto_sync);
//! ```

use std::time::Duration;
use serde::Deserialize;
use crate::resilience::retry::RetryConfig;

/// Attachment quality tier requested for offline media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaQuality {
    Low,
    Medium,
    High,
}

impl MediaQuality {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// How conflicting local and remote edits should be reconciled.
///
/// The engine only stores and exposes this value. No automated merge is
/// performed here; a higher layer reads it and resolves conflicts itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Manual,
    ServerWins,
    ClientWins,
}

/// Configuration for the offline engine.
///
/// All fields have defaults, so an empty JSON object deserializes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineConfig {
    /// Per-user ceiling on cached bytes (default: 1 GiB)
    #[serde(default = "default_max_storage_size")]
    pub max_storage_size: u64,

    /// Per-user ceiling on cached recipes (default: 100)
    #[serde(default = "default_max_recipes")]
    pub max_recipes: u64,

    /// Drain queues periodically in the background
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    /// Background drain period in seconds (default: 30 min)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Retries allowed before a sync operation is marked failed
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_media_quality")]
    pub media_quality: MediaQuality,

    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: ConflictResolution,

    /// Backoff between retries
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    /// Jitter as a fraction of the computed delay (0.0 - 1.0)
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
}

fn default_max_storage_size() -> u64 { 1024 * 1024 * 1024 } // 1 GiB
fn default_max_recipes() -> u64 { 100 }
fn default_auto_sync() -> bool { true }
fn default_sync_interval_secs() -> u64 { 30 * 60 }
fn default_retry_attempts() -> u32 { 3 }
fn default_media_quality() -> MediaQuality { MediaQuality::High }
fn default_conflict_resolution() -> ConflictResolution { ConflictResolution::Manual }
fn default_retry_initial_delay_ms() -> u64 { 500 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_retry_backoff_factor() -> f64 { 2.0 }
fn default_retry_jitter() -> f64 { 0.2 }

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_storage_size: default_max_storage_size(),
            max_recipes: default_max_recipes(),
            auto_sync: default_auto_sync(),
            sync_interval_secs: default_sync_interval_secs(),
            retry_attempts: default_retry_attempts(),
            media_quality: default_media_quality(),
            conflict_resolution: default_conflict_resolution(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_backoff_factor: default_retry_backoff_factor(),
            retry_jitter: default_retry_jitter(),
        }
    }
}

impl OfflineConfig {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Retry policy for the sync processor.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            factor: self.retry_backoff_factor,
            max_retries: Some(self.retry_attempts as usize),
            jitter: self.retry_jitter.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OfflineConfig::default();
        assert_eq!(config.max_recipes, 100);
        assert_eq!(config.sync_interval(), Duration::from_secs(1800));
        assert_eq!(config.media_quality, MediaQuality::High);
        assert_eq!(config.conflict_resolution, ConflictResolution::Manual);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: OfflineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_storage_size, 1024 * 1024 * 1024);
        assert_eq!(config.retry_attempts, 3);
        assert!(config.auto_sync);
    }

    #[test]
    fn test_camel_case_keys() {
        let config: OfflineConfig = serde_json::from_str(
            r#"{"maxStorageSize": 2048, "maxRecipes": 5, "mediaQuality": "medium", "conflictResolution": "server_wins"}"#,
        )
        .unwrap();
        assert_eq!(config.max_storage_size, 2048);
        assert_eq!(config.max_recipes, 5);
        assert_eq!(config.media_quality, MediaQuality::Medium);
        assert_eq!(config.conflict_resolution, ConflictResolution::ServerWins);
    }

    #[test]
    fn test_retry_config_derivation() {
        let config = OfflineConfig {
            retry_attempts: 5,
            retry_jitter: 3.0,
            ..Default::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_retries, Some(5));
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
        assert_eq!(retry.jitter, 1.0);
    }
}
