// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk download: materialize a batch of recipes for offline use.
//!
//! Items are fetched one after another. A failure on one item is recorded
//! against that item and the batch moves on; every requested id ends up in
//! exactly one of `successful`, `failed` or `missing`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use crate::config::MediaQuality;
use crate::diagnostics::{codes, DiagnosticsLog, EventStatus, EventType};
use crate::error::{OfflineError, TransportError};
use crate::manager::OfflineRecordManager;
use crate::metrics;
use crate::record::{RecordKey, RecordKind};

/// One media file fetched from upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Upstream origin of recipe content.
#[async_trait]
pub trait RecipeSource: Send + Sync {
    /// `Ok(None)` when the recipe does not exist upstream.
    async fn fetch_recipe(&self, recipe_id: &str) -> Result<Option<Value>, TransportError>;

    async fn fetch_attachments(
        &self,
        recipe_id: &str,
        quality: MediaQuality,
    ) -> Result<Vec<AttachmentBlob>, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    pub recipe_ids: Vec<String>,
    pub include_attachments: bool,
    /// Falls back to the configured media quality
    pub quality: Option<MediaQuality>,
}

impl DownloadOptions {
    pub fn new<I, S>(recipe_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipe_ids: recipe_ids.into_iter().map(Into::into).collect(),
            include_attachments: false,
            quality: None,
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, quality: MediaQuality) -> Self {
        self.include_attachments = true;
        self.quality = Some(quality);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    pub recipe_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadResult {
    pub successful: Vec<String>,
    pub failed: Vec<DownloadFailure>,
    /// Requested ids that do not exist upstream
    pub missing: Vec<String>,
    /// Record plus attachment bytes written
    pub total_bytes: u64,
    pub duration: Duration,
}

pub struct BulkDownloadJob {
    source: Arc<dyn RecipeSource>,
    records: Arc<OfflineRecordManager>,
    diagnostics: Arc<DiagnosticsLog>,
}

impl BulkDownloadJob {
    pub fn new(
        source: Arc<dyn RecipeSource>,
        records: Arc<OfflineRecordManager>,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> Self {
        Self { source, records, diagnostics }
    }

    #[tracing::instrument(skip(self, options), fields(items = options.recipe_ids.len()))]
    pub async fn download(
        &self,
        user_id: &str,
        options: &DownloadOptions,
        default_quality: MediaQuality,
    ) -> DownloadResult {
        let start = Instant::now();
        let quality = options.quality.unwrap_or(default_quality);
        let mut result = DownloadResult::default();
        let mut seen = HashSet::new();

        for recipe_id in &options.recipe_ids {
            if !seen.insert(recipe_id.as_str()) {
                continue;
            }

            match self.download_one(user_id, recipe_id, options.include_attachments, quality).await {
                Ok(Some(bytes)) => {
                    debug!(user_id, recipe_id, bytes, "Recipe downloaded for offline use");
                    result.total_bytes += bytes;
                    result.successful.push(recipe_id.clone());
                    metrics::record_download_item("success");
                }
                Ok(None) => {
                    debug!(user_id, recipe_id, "Recipe missing upstream");
                    result.missing.push(recipe_id.clone());
                    metrics::record_download_item("missing");
                }
                Err(e) => {
                    self.diagnostics
                        .error(
                            codes::DOWNLOAD_FAILED,
                            format!("Failed to download recipe {}: {}", recipe_id, e),
                            Some(recipe_id),
                        )
                        .await;
                    result.failed.push(DownloadFailure {
                        recipe_id: recipe_id.clone(),
                        error: e.to_string(),
                    });
                    metrics::record_download_item("failed");
                }
            }
        }

        result.duration = start.elapsed();
        metrics::record_download(result.total_bytes, result.duration);

        let status = EventStatus::from_counts(result.successful.len(), result.failed.len());
        self.diagnostics
            .event(
                user_id,
                EventType::Download,
                status,
                format!(
                    "Downloaded {} of {} recipes ({} bytes)",
                    result.successful.len(),
                    seen.len(),
                    result.total_bytes
                ),
                json!({
                    "successful": result.successful.len(),
                    "failed": result.failed.len(),
                    "missing": result.missing.len(),
                    "totalBytes": result.total_bytes,
                    "quality": quality.as_str(),
                    "includeAttachments": options.include_attachments,
                    "durationMs": result.duration.as_millis() as u64,
                }),
            )
            .await;

        info!(
            user_id,
            successful = result.successful.len(),
            failed = result.failed.len(),
            missing = result.missing.len(),
            bytes = result.total_bytes,
            elapsed_ms = result.duration.as_millis() as u64,
            "Bulk download finished"
        );
        result
    }

    /// Bytes written, or `None` if the recipe does not exist upstream.
    ///
    /// All upstream fetches happen before anything is written. If storing the
    /// attachments fails, the record is rolled back to what was cached before,
    /// so a failed item never leaves a half-written copy behind.
    async fn download_one(
        &self,
        user_id: &str,
        recipe_id: &str,
        include_attachments: bool,
        quality: MediaQuality,
    ) -> Result<Option<u64>, OfflineError> {
        let Some(data) = self.source.fetch_recipe(recipe_id).await? else {
            return Ok(None);
        };
        let blobs = if include_attachments {
            Some(self.source.fetch_attachments(recipe_id, quality).await?)
        } else {
            None
        };

        let key = RecordKey::new(user_id, RecordKind::Recipe, recipe_id);
        let previous = self.records.get_record(&key).await?;
        let record = self.records.store(user_id, RecordKind::Recipe, recipe_id, data).await?;
        let mut bytes = record.size;

        if let Some(blobs) = blobs {
            match self.records.replace_attachments(&key, quality, blobs).await {
                Ok(written) => bytes += written,
                Err(e) => {
                    if let Err(rollback) = self.records.restore(&key, previous.as_ref()).await {
                        warn!(key = %key, error = %rollback, "Failed to roll back partial download");
                    }
                    return Err(e);
                }
            }
        }
        Ok(Some(bytes))
    }
}
