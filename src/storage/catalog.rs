//! File Catalog - live per-user listing plus delete
//!
//! The view is replaced wholesale on every change notification. No
//! incremental patching, so interleaved notifications can never leave the
//! view half-updated.

use super::{FileRecord, QuotaLedger, StorageError};
use crate::backend::{Filter, MetadataError, MetadataStore, ObjectStore, Order, Subscription};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Callback receiving each refreshed view.
pub type ViewHandler = Arc<dyn Fn(&[FileRecord]) + Send + Sync>;

/// Live listing of one user's files, newest first.
#[derive(Clone)]
pub struct FileCatalog {
    objects: Arc<dyn ObjectStore>,
    meta: Arc<dyn MetadataStore>,
    ledger: QuotaLedger,
    files_table: String,
    view: Arc<RwLock<Vec<FileRecord>>>,
}

/// Handle for a live catalog watch.
///
/// Dropping it stops the refresh task and releases the change-feed
/// subscription, so teardown happens on every exit path.
pub struct CatalogWatcher {
    task: JoinHandle<()>,
    _subscription: Subscription,
}

impl Drop for CatalogWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FileCatalog {
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
            view: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Query the user's files (newest first) and replace the view wholesale.
    pub async fn load(&self, user_id: &str) -> Result<Vec<FileRecord>, StorageError> {
        let rows = self
            .meta
            .query(
                &self.files_table,
                &Filter::eq("owner_id", user_id),
                Some(&Order::desc("uploaded_at")),
            )
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record: FileRecord = serde_json::from_value(row)
                .map_err(|e| StorageError::Metadata(MetadataError::Malformed(e.to_string())))?;
            records.push(record);
        }

        *self.view.write() = records.clone();
        Ok(records)
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> Vec<FileRecord> {
        self.view.read().clone()
    }

    /// Follow the change feed for `user_id`. Every notification, whatever
    /// its kind, triggers a full re-query, and `handler` receives the
    /// fresh view. Pair with an initial [`FileCatalog::load`] to seed.
    pub fn watch(&self, user_id: &str, handler: ViewHandler) -> CatalogWatcher {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.meta.subscribe(
            &self.files_table,
            Filter::eq("owner_id", user_id),
            Arc::new(move |_event| {
                let _ = tx.send(());
            }),
        );

        let catalog = self.clone();
        let user_id = user_id.to_string();
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                match catalog.load(&user_id).await {
                    Ok(records) => handler(&records),
                    Err(err) => {
                        tracing::warn!("catalog refresh failed for {}: {}", user_id, err);
                    }
                }
            }
        });

        CatalogWatcher {
            task,
            _subscription: subscription,
        }
    }

    /// Delete `file_id` for `user_id`: object first, then the record, then
    /// the counter (clamped at zero). An object-removal failure leaves
    /// record, object, and counter all in their prior state.
    pub async fn delete(&self, user_id: &str, file_id: &str) -> Result<(), StorageError> {
        let rows = self
            .meta
            .query(&self.files_table, &Filter::eq("id", file_id), None)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound(file_id.to_string()))?;
        let record: FileRecord = serde_json::from_value(row)
            .map_err(|e| StorageError::Metadata(MetadataError::Malformed(e.to_string())))?;
        if record.owner_id != user_id {
            return Err(StorageError::NotFound(file_id.to_string()));
        }

        self.objects
            .remove(std::slice::from_ref(&record.storage_key))
            .await
            .map_err(StorageError::DeleteFailed)?;

        self.meta
            .delete(&self.files_table, &Filter::eq("id", file_id))
            .await?;

        if let Err(err) = self
            .ledger
            .apply_delta(user_id, -(record.size_bytes as i64))
            .await
        {
            tracing::error!(
                "counter decrement failed for {} after delete of {}: {}",
                user_id,
                file_id,
                err
            );
            return Err(StorageError::LedgerUpdateFailed {
                user_id: user_id.to_string(),
                detail: err.to_string(),
            });
        }

        tracing::info!(
            "deleted {} ({} bytes) for {}",
            record.name,
            record.size_bytes,
            user_id
        );
        Ok(())
    }
}
