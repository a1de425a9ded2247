//! In-memory object store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stash_core::{Error, ObjectKey, ObjectStore, Result, StoredObject};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Object store holding every blob in process memory.
///
/// Used for tests and dry runs. Keys are normalized through [`ObjectKey`] so
/// `Bucket/key` and `/bucket/key` address the same object.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    remote_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` at `key` with the current time as its modification time.
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        self.insert_at(key, data, Utc::now())
    }

    /// Store `data` at `key` with an explicit modification time.
    pub fn insert_at(
        &self,
        key: &str,
        data: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) -> Result<()> {
        let key = ObjectKey::parse(key)?;
        self.objects().insert(
            key.to_string(),
            MemoryObject {
                data: data.into(),
                last_modified,
            },
        );
        Ok(())
    }

    /// Contents stored at `key`, if any.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        let key = ObjectKey::parse(key).ok()?;
        self.objects().get(&key.to_string()).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.object(key).is_some()
    }

    /// All stored keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Number of store operations that got past key validation.
    pub fn remote_calls(&self) -> usize {
        self.remote_calls.load(Ordering::SeqCst)
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_call(&self) {
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;
        self.record_call();

        let data = self
            .objects()
            .get(&parsed.to_string())
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::transport(key, "object not found"))?;

        debug!(key = %parsed, size = data.len(), "Reading object from memory");
        sink.write_all(&data).await?;
        sink.flush().await?;
        Ok(())
    }

    async fn put(&self, key: &str, source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;
        self.record_call();

        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;

        debug!(key = %parsed, size = data.len(), "Storing object in memory");
        self.objects().insert(
            parsed.to_string(),
            MemoryObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let parsed = ObjectKey::parse(prefix)?;
        self.record_call();

        let prefix = parsed.to_string();
        Ok(self
            .objects()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, o)| StoredObject::new(key.clone(), o.data.len() as u64, o.last_modified))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;
        self.record_call();

        self.objects().remove(&parsed.to_string());
        Ok(())
    }
}
