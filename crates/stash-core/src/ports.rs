//! Port traits.
//!
//! The cache engine and flusher are written against these interfaces; the
//! concrete object stores live in adapter crates.

use crate::Result;
use crate::object::StoredObject;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Blob storage addressed by `bucket/object-key` paths.
///
/// Implementations must parse every key with
/// [`ObjectKey::parse`](crate::ObjectKey::parse) before doing any I/O so that
/// malformed keys fail with [`Error::InvalidKey`](crate::Error::InvalidKey)
/// without reaching the backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the object at `key` into `sink`.
    async fn get(&self, key: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()>;

    /// Store everything readable from `source` at `key`.
    async fn put(&self, key: &str, source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()>;

    /// List every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;

    /// Delete the object at `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}
