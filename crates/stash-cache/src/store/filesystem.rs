//! Filesystem-backed object store for local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stash_core::{Error, ObjectKey, ObjectStore, Result, StoredObject};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

const PARTIAL_SUFFIX: &str = ".partial";

/// Object store keeping blobs under `root/<bucket>/<object-key>`.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Location of `key` on disk; keys with `..` segments would leave `root_dir`.
    fn object_path(&self, key: &ObjectKey) -> Result<PathBuf> {
        let escapes = key.bucket() == ".." || key.key().split('/').any(|segment| segment == "..");
        if escapes {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(self.root_dir.join(key.bucket()).join(key.key()))
    }

    fn partial_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, key: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;
        let path = self.object_path(&parsed)?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            Error::transport(key, format!("failed to open {}: {}", path.display(), e))
        })?;

        let size = tokio::io::copy(&mut file, sink).await?;
        sink.flush().await?;

        info!(key = %parsed, size, "Object read from filesystem store");
        Ok(())
    }

    async fn put(&self, key: &str, source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;
        let path = self.object_path(&parsed)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::transport(key, format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        // Write next to the target and rename so readers never see a partial blob.
        let partial = Self::partial_path(&path);
        let mut file = tokio::fs::File::create(&partial).await.map_err(|e| {
            Error::transport(key, format!("failed to create {}: {}", partial.display(), e))
        })?;

        let copied = async {
            let size = tokio::io::copy(source, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(size)
        }
        .await;

        let size = match copied {
            Ok(size) => size,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e.into());
            }
        };

        tokio::fs::rename(&partial, &path).await.map_err(|e| {
            Error::transport(key, format!("failed to finalize {}: {}", path.display(), e))
        })?;

        info!(key = %parsed, size, "Object written to filesystem store");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let parsed = ObjectKey::parse(prefix)?;
        self.object_path(&parsed)?;
        let bucket_dir = self.root_dir.join(parsed.bucket());

        if !bucket_dir.exists() {
            return Ok(vec![]);
        }

        let mut entries = vec![];
        let mut pending = vec![bucket_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await.map_err(|e| {
                Error::transport(prefix, format!("failed to read {}: {}", dir.display(), e))
            })?;

            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| Error::transport(prefix, format!("failed to read entry: {}", e)))?
            {
                let path = entry.path();
                let metadata = entry.metadata().await.map_err(|e| {
                    Error::transport(prefix, format!("failed to read metadata: {}", e))
                })?;

                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                    continue;
                };
                let object_key = relative.to_string_lossy().replace('\\', "/");
                if object_key.ends_with(PARTIAL_SUFFIX) || !object_key.starts_with(parsed.key()) {
                    continue;
                }

                let last_modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());

                debug!(key = %object_key, size = metadata.len(), "Found object");
                entries.push(StoredObject::new(
                    format!("{}/{}", parsed.bucket(), object_key),
                    metadata.len(),
                    last_modified,
                ));
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        info!(prefix = %parsed, count = entries.len(), "Listed objects");
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let parsed = ObjectKey::parse(key)?;
        let path = self.object_path(&parsed)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(key = %parsed, "Object deleted from filesystem store");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::transport(
                key,
                format!("failed to delete {}: {}", path.display(), e),
            )),
        }
    }
}
