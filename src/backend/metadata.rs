//! Metadata store client interface - records, queries, and the change feed

use super::MetadataError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Single-field equality predicate, the only filter shape the core issues.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Does `record` satisfy this filter?
    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

/// Sort order for query results.
#[derive(Debug, Clone)]
pub struct Order {
    pub field: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Reference to an inserted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    /// Store-assigned record id.
    pub id: String,
}

/// Kind of change observed on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change-feed notification.
///
/// `record` is the new row for inserts and updates, the removed row for
/// deletes. Consumers in this crate never inspect it; any event triggers a
/// full re-query.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Value,
}

/// Callback invoked for every matching change event.
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Live change-feed registration.
///
/// Dropping the guard unsubscribes, so the feed is released on every exit
/// path: normal teardown, sign-out, or error.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Durable structured record storage with query and change notifications.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record, returning the store-assigned id.
    async fn insert(&self, table: &str, record: Value) -> Result<RecordRef, MetadataError>;

    /// All records matching `filter`, optionally sorted.
    async fn query(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&Order>,
    ) -> Result<Vec<Value>, MetadataError>;

    /// Merge the fields of `patch` into every record matching `filter`.
    async fn update(&self, table: &str, filter: &Filter, patch: Value)
        -> Result<(), MetadataError>;

    /// Delete every record matching `filter`.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), MetadataError>;

    /// Subscribe to changes on `table` restricted to rows matching `filter`.
    fn subscribe(&self, table: &str, filter: Filter, handler: ChangeHandler) -> Subscription;
}
