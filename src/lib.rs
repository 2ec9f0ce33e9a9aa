//! DriveBox Core - quota-enforced per-user file storage
//!
//! This crate provides the storage engine behind a per-user file area:
//! admission-checked uploads with progress reporting, a live file listing
//! driven by the backing store's change feed, and deletes that keep the
//! running `storage_used` counter consistent with the set of stored objects.
//!
//! The persistence substrate (object store + metadata store) and the
//! session provider are external services reached through the traits in
//! [`backend`] and [`session`]; an in-process [`backend::MemoryBackend`]
//! backs tests and offline runs.

pub mod backend;
pub mod session;
pub mod storage;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use backend::{MetadataError, MetadataStore, ObjectStore, ObjectStoreError};
use storage::{
    CatalogWatcher, FileCatalog, FileRecord, QuotaLedger, UploadOrchestrator, UploadProgress,
    UploadRequest, UserQuota, ViewHandler,
};

/// Main error type for DriveBox operations
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Metadata store error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

pub type Result<T> = std::result::Result<T, DriveError>;

/// Core configuration for a drive instance
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DriveConfig {
    /// Table holding file metadata records
    pub files_table: String,

    /// Table holding per-account quota columns
    pub users_table: String,

    /// Storage limit applied when an account row carries none (bytes)
    pub default_storage_limit: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            files_table: "files".to_string(),
            users_table: "users".to_string(),
            default_storage_limit: 1024 * 1024 * 1024, // 1 GB
        }
    }
}

/// Assembled storage core: quota ledger, upload orchestrator, and file
/// catalog wired over one pair of store clients.
///
/// Every operation takes the acting user's id explicitly; sourcing that
/// identity is the caller's concern (see [`session::SessionTracker`]).
pub struct Drive {
    pub config: DriveConfig,
    ledger: QuotaLedger,
    uploader: UploadOrchestrator,
    catalog: FileCatalog,
}

impl Drive {
    pub fn new(
        config: DriveConfig,
        objects: Arc<dyn ObjectStore>,
        meta: Arc<dyn MetadataStore>,
    ) -> Self {
        let ledger = QuotaLedger::new(
            Arc::clone(&meta),
            config.users_table.clone(),
            config.default_storage_limit,
        );
        let uploader = UploadOrchestrator::new(
            Arc::clone(&objects),
            Arc::clone(&meta),
            ledger.clone(),
            config.files_table.clone(),
        );
        let catalog = FileCatalog::new(objects, meta, ledger.clone(), config.files_table.clone());

        Self {
            config,
            ledger,
            uploader,
            catalog,
        }
    }

    /// Stream upload progress events to `tx`.
    pub fn with_upload_progress(mut self, tx: mpsc::UnboundedSender<UploadProgress>) -> Self {
        self.uploader = self.uploader.with_progress(tx);
        self
    }

    /// Upload a file on behalf of `user_id`.
    pub async fn upload(&self, user_id: &str, request: UploadRequest) -> Result<FileRecord> {
        Ok(self.uploader.upload(user_id, request).await?)
    }

    /// The user's files, newest first.
    pub async fn files(&self, user_id: &str) -> Result<Vec<FileRecord>> {
        Ok(self.catalog.load(user_id).await?)
    }

    /// Delete one file, object first.
    pub async fn delete(&self, user_id: &str, file_id: &str) -> Result<()> {
        Ok(self.catalog.delete(user_id, file_id).await?)
    }

    /// Follow the change feed for `user_id`; pair with an initial
    /// [`Drive::files`] call to seed the first view.
    pub fn watch(&self, user_id: &str, handler: ViewHandler) -> CatalogWatcher {
        self.catalog.watch(user_id, handler)
    }

    /// Current quota usage for `user_id`.
    pub async fn quota(&self, user_id: &str) -> Result<UserQuota> {
        Ok(self.ledger.usage(user_id).await?)
    }

    pub fn uploader(&self) -> &UploadOrchestrator {
        &self.uploader
    }

    pub fn catalog(&self) -> &FileCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }
}
