//! In-process backend implementing both store traits over plain maps.
//!
//! Backs the test suite and offline runs; production deployments reach an
//! external service through the same traits.

use super::{
    ChangeEvent, ChangeHandler, ChangeKind, Filter, MetadataError, MetadataStore, ObjectRef,
    ObjectStore, ObjectStoreError, Order, RecordRef, Subscription, UploadOptions,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Upload chunk size; small enough that multi-chunk progress shows up in tests.
const CHUNK_BYTES: usize = 64 * 1024;

/// In-memory object and metadata store.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

struct Shared {
    base_url: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    tables: Mutex<HashMap<String, Vec<Value>>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
}

struct Subscriber {
    table: String,
    filter: Filter,
    handler: ChangeHandler,
}

impl MemoryBackend {
    /// Create a backend serving the named bucket.
    pub fn new(bucket: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                base_url: format!("memory://{bucket}"),
                objects: Mutex::new(HashMap::new()),
                tables: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.shared.objects.lock().len()
    }

    /// Bytes stored under `key`, if any.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.shared.objects.lock().get(key).cloned()
    }

    /// Number of live change-feed subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    // Handlers run outside the table lock; a handler is free to issue new
    // store calls.
    fn notify(&self, event: ChangeEvent) {
        let handlers: Vec<ChangeHandler> = {
            let subscribers = self.shared.subscribers.lock();
            subscribers
                .values()
                .filter(|s| s.table == event.table && s.filter.matches(&event.record))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        for handler in handlers {
            handler(&event);
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        opts: UploadOptions,
    ) -> Result<ObjectRef, ObjectStoreError> {
        if !opts.overwrite && self.shared.objects.lock().contains_key(key) {
            return Err(ObjectStoreError::KeyExists(key.to_string()));
        }

        if let Some(on_progress) = &opts.on_progress {
            let total = bytes.len() as u64;
            if total == 0 {
                on_progress(0, 0);
            } else {
                let mut sent = 0u64;
                for chunk in bytes.chunks(CHUNK_BYTES) {
                    sent += chunk.len() as u64;
                    on_progress(sent, total);
                }
            }
        }

        self.shared
            .objects
            .lock()
            .insert(key.to_string(), bytes.to_vec());
        Ok(ObjectRef {
            key: key.to_string(),
        })
    }

    async fn remove(&self, keys: &[String]) -> Result<(), ObjectStoreError> {
        let mut objects = self.shared.objects.lock();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.shared.base_url, key)
    }
}

#[async_trait]
impl MetadataStore for MemoryBackend {
    async fn insert(&self, table: &str, mut record: Value) -> Result<RecordRef, MetadataError> {
        let fields = record
            .as_object_mut()
            .ok_or_else(|| MetadataError::Malformed("record is not an object".into()))?;

        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = Uuid::new_v4().to_string();
                fields.insert("id".into(), Value::String(id.clone()));
                id
            }
        };

        self.shared
            .tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());

        self.notify(ChangeEvent {
            table: table.to_string(),
            kind: ChangeKind::Insert,
            record,
        });
        Ok(RecordRef { id })
    }

    async fn query(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&Order>,
    ) -> Result<Vec<Value>, MetadataError> {
        let mut rows: Vec<Value> = {
            let tables = self.shared.tables.lock();
            tables
                .get(table)
                .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
                .unwrap_or_default()
        };

        if let Some(order) = order {
            rows.sort_by(|a, b| compare_fields(a, b, &order.field));
            if !order.ascending {
                rows.reverse();
            }
        }
        Ok(rows)
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<(), MetadataError> {
        let patch = patch
            .as_object()
            .ok_or_else(|| MetadataError::Malformed("patch is not an object".into()))?
            .clone();

        let changed: Vec<Value> = {
            let mut tables = self.shared.tables.lock();
            let rows = tables.entry(table.to_string()).or_default();
            let mut changed = Vec::new();
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                if let Some(fields) = row.as_object_mut() {
                    for (key, value) in &patch {
                        fields.insert(key.clone(), value.clone());
                    }
                }
                changed.push(row.clone());
            }
            changed
        };

        for record in changed {
            self.notify(ChangeEvent {
                table: table.to_string(),
                kind: ChangeKind::Update,
                record,
            });
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), MetadataError> {
        let removed: Vec<Value> = {
            let mut tables = self.shared.tables.lock();
            let rows = tables.entry(table.to_string()).or_default();
            let mut removed = Vec::new();
            rows.retain(|row| {
                if filter.matches(row) {
                    removed.push(row.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };

        for record in removed {
            self.notify(ChangeEvent {
                table: table.to_string(),
                kind: ChangeKind::Delete,
                record,
            });
        }
        Ok(())
    }

    fn subscribe(&self, table: &str, filter: Filter, handler: ChangeHandler) -> Subscription {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().insert(
            id,
            Subscriber {
                table: table.to_string(),
                filter,
                handler,
            },
        );

        let shared = Arc::clone(&self.shared);
        Subscription::new(move || {
            shared.subscribers.lock().remove(&id);
        })
    }
}

/// Numeric comparison when both sides are numbers, string otherwise.
fn compare_fields(a: &Value, b: &Value, field: &str) -> std::cmp::Ordering {
    let (a, b) = (a.get(field), b.get(field));
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => {
            let x = a.and_then(Value::as_str).unwrap_or_default();
            let y = b.and_then(Value::as_str).unwrap_or_default();
            x.cmp(y)
        }
    }
}
