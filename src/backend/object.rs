//! Object store client interface - durable key to bytes storage

use super::ObjectStoreError;
use async_trait::async_trait;

/// Progress callback invoked while bytes reach the store: `(bytes_sent, total_bytes)`.
///
/// Granularity is whatever the transport provides; no minimum interval.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Options for a single object upload.
pub struct UploadOptions {
    /// Replace an existing object under the same key. The core always
    /// uploads with this disabled; a collision must surface as
    /// [`ObjectStoreError::KeyExists`], never a silent overwrite.
    pub overwrite: bool,

    /// Progress reporting hook.
    pub on_progress: Option<ProgressFn>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            on_progress: None,
        }
    }
}

/// Reference to a durably written object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Key the object was stored under.
    pub key: String,
}

/// Durable key-addressed binary storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`.
    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        opts: UploadOptions,
    ) -> Result<ObjectRef, ObjectStoreError>;

    /// Remove the given keys. Keys already absent are not an error.
    async fn remove(&self, keys: &[String]) -> Result<(), ObjectStoreError>;

    /// Publicly resolvable URL for `key`.
    fn public_url(&self, key: &str) -> String;
}
