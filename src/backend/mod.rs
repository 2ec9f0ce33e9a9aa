//! Backend Module - clients for the external storage substrate
//!
//! The core reaches the object store (durable key-addressed blobs) and the
//! metadata store (records, queries, change feed) through the traits defined
//! here. An in-process backend implementing both traits backs the test suite
//! and offline runs.

mod memory;
mod metadata;
mod object;

pub use memory::MemoryBackend;
pub use metadata::{
    ChangeEvent, ChangeHandler, ChangeKind, Filter, MetadataStore, Order, RecordRef, Subscription,
};
pub use object::{ObjectRef, ObjectStore, ProgressFn, UploadOptions};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object key already exists: {0}")]
    KeyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}
