//! Upload Orchestrator - admission, object write, record insert, counter
//!
//! The three commits are independent network calls, not a transaction. Each
//! failure point has its own error kind so callers can tell an orphaned
//! object (invisible, unreferenced) from counter drift (data safe, counter
//! low).

use super::{QuotaLedger, StorageError};
use crate::backend::{MetadataError, MetadataStore, ObjectStore, ProgressFn, UploadOptions};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Length of the random storage-key suffix.
const KEY_SUFFIX_LEN: usize = 12;

/// Metadata record for one stored file. Created by a successful upload,
/// destroyed by a successful delete, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Store-assigned record id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Owning user.
    pub owner_id: String,

    /// Client-supplied file name.
    pub name: String,

    /// MIME type.
    pub mime_type: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Object store key, unique per file.
    pub storage_key: String,

    /// Resolvable download locator derived from the key.
    pub download_url: String,

    /// Insert timestamp (unix millis).
    pub uploaded_at: i64,
}

/// A candidate file handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Original file name.
    pub name: String,

    /// Client-declared MIME type; guessed from the name when absent.
    pub mime_type: Option<String>,

    /// File contents.
    pub bytes: Vec<u8>,
}

/// Progress report for an in-flight upload.
#[derive(Debug, Clone)]
pub struct UploadProgress {
    /// Storage key of the upload being reported.
    pub storage_key: String,

    pub bytes_sent: u64,
    pub total_bytes: u64,

    /// Percent in [0, 100], non-decreasing across one upload.
    pub percent: u8,
}

/// Runs the upload sequence: admission check, object write with progress,
/// record insert, counter increment.
///
/// Uploads are independent and reentrant; a second upload may be issued
/// while one is in flight, each with its own progress stream.
pub struct UploadOrchestrator {
    objects: Arc<dyn ObjectStore>,
    meta: Arc<dyn MetadataStore>,
    ledger: QuotaLedger,
    files_table: String,
    progress_tx: Option<mpsc::UnboundedSender<UploadProgress>>,
}

impl UploadOrchestrator {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        meta: Arc<dyn MetadataStore>,
        ledger: QuotaLedger,
        files_table: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            meta,
            ledger,
            files_table: files_table.into(),
            progress_tx: None,
        }
    }

    /// Stream progress events to `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<UploadProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Upload `request` on behalf of `user_id`.
    ///
    /// Success means all three steps committed. A
    /// [`StorageError::LedgerUpdateFailed`] return means the object and its
    /// record are durable and only the counter lags.
    pub async fn upload(
        &self,
        user_id: &str,
        request: UploadRequest,
    ) -> Result<FileRecord, StorageError> {
        let size = request.bytes.len() as u64;

        let admission = self.ledger.check_admission(user_id, size).await?;
        if !admission.admitted {
            return Err(StorageError::QuotaExceeded {
                requested: size,
                remaining: admission.remaining,
            });
        }

        let storage_key = derive_storage_key(user_id, &request.name);
        let options = UploadOptions {
            overwrite: false,
            on_progress: self.progress_reporter(&storage_key),
        };

        self.objects
            .upload(&storage_key, &request.bytes, options)
            .await
            .map_err(StorageError::UploadFailed)?;

        let mime_type = request.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&request.name)
                .first_or_octet_stream()
                .to_string()
        });

        let record = FileRecord {
            id: String::new(),
            owner_id: user_id.to_string(),
            name: request.name,
            mime_type,
            size_bytes: size,
            storage_key: storage_key.clone(),
            download_url: self.objects.public_url(&storage_key),
            uploaded_at: chrono::Utc::now().timestamp_millis(),
        };

        let row = serde_json::to_value(&record)
            .map_err(|e| StorageError::Metadata(MetadataError::Malformed(e.to_string())))?;
        let inserted = match self.meta.insert(&self.files_table, row).await {
            Ok(inserted) => inserted,
            Err(source) => {
                tracing::warn!(
                    "record insert failed, uploaded object {} is orphaned: {}",
                    storage_key,
                    source
                );
                return Err(StorageError::MetadataWriteFailed {
                    key: storage_key,
                    source,
                });
            }
        };
        let record = FileRecord {
            id: inserted.id,
            ..record
        };

        if let Err(err) = self.ledger.apply_delta(user_id, size as i64).await {
            tracing::error!(
                "counter update failed after committed upload of {}, storage_used under-counts for {}: {}",
                record.storage_key,
                user_id,
                err
            );
            return Err(StorageError::LedgerUpdateFailed {
                user_id: user_id.to_string(),
                detail: err.to_string(),
            });
        }

        tracing::info!(
            "uploaded {} ({} bytes) for {} as {}",
            record.name,
            size,
            user_id,
            record.storage_key
        );
        Ok(record)
    }

    // Converts transport (sent, total) callbacks into percent events,
    // forced non-decreasing across the one upload.
    fn progress_reporter(&self, storage_key: &str) -> Option<ProgressFn> {
        let tx = self.progress_tx.clone()?;
        let key = storage_key.to_string();
        let last = Mutex::new(0u8);

        Some(Box::new(move |sent, total| {
            let percent = if total == 0 {
                100
            } else {
                ((sent as f64 / total as f64) * 100.0).round() as u8
            };
            let percent = {
                let mut last = last.lock();
                *last = (*last).max(percent);
                *last
            };
            let _ = tx.send(UploadProgress {
                storage_key: key.clone(),
                bytes_sent: sent,
                total_bytes: total,
                percent,
            });
        }))
    }
}

/// Storage keys are namespaced under the owner and salted with the upload
/// time plus a random suffix: `{user}/{millis}-{suffix}.{ext}`.
fn derive_storage_key(user_id: &str, file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    format!(
        "{}/{}-{}.{}",
        user_id,
        chrono::Utc::now().timestamp_millis(),
        suffix,
        extension
    )
}
