//! Storage Module - quota-enforced upload/delete/sync engine
//!
//! The only part of the system with real invariants: the `storage_used`
//! counter must track the set of stored objects across a three-step commit
//! (object write, record insert, counter update) that is not a transaction.
//! Each failure point carries its own error kind.

mod catalog;
mod quota;
mod uploader;

pub use catalog::{CatalogWatcher, FileCatalog, ViewHandler};
pub use quota::{format_bytes, Admission, QuotaLedger, UserQuota};
pub use uploader::{FileRecord, UploadOrchestrator, UploadProgress, UploadRequest};

use crate::backend::{MetadataError, ObjectStoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Admission pre-check failed; nothing was written.
    #[error("Quota exceeded: {requested} bytes requested, {remaining} bytes remaining")]
    QuotaExceeded { requested: u64, remaining: u64 },

    /// Object write failed (transport or key collision); nothing committed.
    #[error("Upload failed: {0}")]
    UploadFailed(#[source] ObjectStoreError),

    /// Object written but the record insert failed. The object is orphaned:
    /// unreferenced, never served, and not reclaimed automatically.
    #[error("Metadata write failed for object {key}: {source}")]
    MetadataWriteFailed {
        key: String,
        #[source]
        source: MetadataError,
    },

    /// Data committed but the counter update failed. The user's file is
    /// safe; `storage_used` drifts low until external reconciliation.
    #[error("Ledger update failed for user {user_id}: {detail}")]
    LedgerUpdateFailed { user_id: String, detail: String },

    /// Object removal failed during delete. Record, object, and counter are
    /// all still in their prior state.
    #[error("Delete failed: {0}")]
    DeleteFailed(#[source] ObjectStoreError),

    /// Delete target does not exist, or belongs to another user.
    #[error("File not found: {0}")]
    NotFound(String),

    /// No account row for the user; accounts are provisioned externally.
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    /// Metadata store failure outside the named commit steps.
    #[error("Metadata store error: {0}")]
    Metadata(#[from] MetadataError),
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::backend::{
        ChangeHandler, Filter, MemoryBackend, MetadataError, MetadataStore, ObjectRef,
        ObjectStore, ObjectStoreError, Order, RecordRef, Subscription, UploadOptions,
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Memory backend wrapper with per-call fault switches and a counter of
    /// mutating store calls, for exercising each failure point of the
    /// upload/delete sequence.
    pub(crate) struct FaultyBackend {
        pub inner: MemoryBackend,
        pub fail_object_upload: AtomicBool,
        pub fail_object_remove: AtomicBool,
        pub key_exists_on_upload: AtomicBool,
        pub fail_insert: AtomicBool,
        pub fail_update: AtomicBool,
        mutations: AtomicUsize,
    }

    impl FaultyBackend {
        pub fn new(inner: MemoryBackend) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_object_upload: AtomicBool::new(false),
                fail_object_remove: AtomicBool::new(false),
                key_exists_on_upload: AtomicBool::new(false),
                fail_insert: AtomicBool::new(false),
                fail_update: AtomicBool::new(false),
                mutations: AtomicUsize::new(0),
            })
        }

        /// Mutating calls (object upload/remove, record insert/update/delete)
        /// seen so far. Reads are not counted.
        pub fn mutation_count(&self) -> usize {
            self.mutations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectStore for FaultyBackend {
        async fn upload(
            &self,
            key: &str,
            bytes: &[u8],
            opts: UploadOptions,
        ) -> Result<ObjectRef, ObjectStoreError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            if self.key_exists_on_upload.load(Ordering::SeqCst) {
                return Err(ObjectStoreError::KeyExists(key.to_string()));
            }
            if self.fail_object_upload.load(Ordering::SeqCst) {
                return Err(ObjectStoreError::Transport(
                    "injected upload failure".into(),
                ));
            }
            self.inner.upload(key, bytes, opts).await
        }

        async fn remove(&self, keys: &[String]) -> Result<(), ObjectStoreError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            if self.fail_object_remove.load(Ordering::SeqCst) {
                return Err(ObjectStoreError::Transport(
                    "injected remove failure".into(),
                ));
            }
            self.inner.remove(keys).await
        }

        fn public_url(&self, key: &str) -> String {
            self.inner.public_url(key)
        }
    }

    #[async_trait]
    impl MetadataStore for FaultyBackend {
        async fn insert(&self, table: &str, record: Value) -> Result<RecordRef, MetadataError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(MetadataError::Transport("injected insert failure".into()));
            }
            self.inner.insert(table, record).await
        }

        async fn query(
            &self,
            table: &str,
            filter: &Filter,
            order: Option<&Order>,
        ) -> Result<Vec<Value>, MetadataError> {
            self.inner.query(table, filter, order).await
        }

        async fn update(
            &self,
            table: &str,
            filter: &Filter,
            patch: Value,
        ) -> Result<(), MetadataError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            if self.fail_update.load(Ordering::SeqCst) {
                return Err(MetadataError::Transport("injected update failure".into()));
            }
            self.inner.update(table, filter, patch).await
        }

        async fn delete(&self, table: &str, filter: &Filter) -> Result<(), MetadataError> {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(table, filter).await
        }

        fn subscribe(&self, table: &str, filter: Filter, handler: ChangeHandler) -> Subscription {
            self.inner.subscribe(table, filter, handler)
        }
    }
}
