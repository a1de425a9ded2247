//! Cache rebuild and restore.
//!
//! Each transfer runs two tasks joined by a [`pipe`]: the archive codec on a
//! blocking thread and the object store call on the async task. Bytes flow
//! through the bounded pipe, so neither side ever holds the whole archive.

use crate::archive::ArchiveFormat;
use crate::pipe::{DEFAULT_PIPE_CAPACITY, pipe};
use crate::types::RestoreOutcome;
use stash_core::{Error, ObjectKey, ObjectStore, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, error, info, warn};

/// Cache engine bound to one store and one archive format.
pub struct Cache {
    store: Arc<dyn ObjectStore>,
    format: ArchiveFormat,
    destination: PathBuf,
    pipe_capacity: usize,
}

impl Cache {
    /// Create an engine that restores relative to the current directory.
    pub fn new(store: Arc<dyn ObjectStore>, format: ArchiveFormat) -> Self {
        Self {
            store,
            format,
            destination: PathBuf::new(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    /// Unpack restored archives below `destination` instead of the current directory.
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Set the number of bytes buffered between codec and store.
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Archive `sources` and upload the result to `destination`.
    ///
    /// Packing and uploading run concurrently. A packing failure is reported
    /// in preference to the upload failure it causes.
    pub async fn rebuild(&self, sources: &[PathBuf], destination: &str) -> Result<()> {
        ObjectKey::parse(destination)?;

        let start = Instant::now();
        info!(key = %destination, sources = ?sources, format = %self.format, "Rebuilding cache");

        let (writer, mut reader) = pipe(self.pipe_capacity);
        let mut sink = SyncIoBridge::new(writer);
        let format = self.format;
        let sources = sources.to_vec();

        let pack = tokio::task::spawn_blocking(move || {
            let result = format.pack(&sources, &mut sink);
            if result.is_ok() {
                sink.into_inner().finish();
            }
            result
        });

        // Owns the reader so it is dropped, unblocking the packer, as soon as the upload ends.
        let upload = async move { self.store.put(destination, &mut reader).await };

        let (packed, uploaded) = tokio::join!(pack, upload);
        let packed = packed.map_err(|e| Error::Internal(format!("archive task failed: {}", e)))?;

        let result = first_failure(packed, uploaded);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(key = %destination, elapsed_ms, "Cache rebuilt"),
            Err(e) => error!(key = %destination, elapsed_ms, error = %e, "Cache rebuild failed"),
        }
        result
    }

    /// Restore the archive at `primary`, falling back to `fallback`.
    ///
    /// The fallback is skipped when it is empty or equal to `primary`. A cache
    /// that cannot be restored is logged and reported through the outcome; this
    /// never returns an error so a cold cache cannot fail the build.
    pub async fn restore(&self, primary: &str, fallback: &str) -> Result<RestoreOutcome> {
        let start = Instant::now();
        info!(key = %primary, fallback = %fallback, "Restoring cache");

        let primary_error = match self.restore_from(primary).await {
            Ok(()) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(key = %primary, elapsed_ms, "Cache restored");
                return Ok(RestoreOutcome::Restored {
                    key: primary.to_string(),
                    fallback: false,
                });
            }
            Err(e) => e,
        };

        if fallback.is_empty() || fallback == primary {
            warn!(key = %primary, error = %primary_error, "Cache could not be restored");
            return Ok(RestoreOutcome::Missed {
                primary: primary_error.to_string(),
                fallback: None,
            });
        }

        warn!(
            key = %primary,
            fallback = %fallback,
            error = %primary_error,
            "Failed to retrieve cache, trying fallback"
        );

        match self.restore_from(fallback).await {
            Ok(()) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(key = %fallback, elapsed_ms, "Cache restored from fallback");
                Ok(RestoreOutcome::Restored {
                    key: fallback.to_string(),
                    fallback: true,
                })
            }
            Err(fallback_error) => {
                warn!(key = %fallback, error = %fallback_error, "Cache could not be restored");
                Ok(RestoreOutcome::Missed {
                    primary: primary_error.to_string(),
                    fallback: Some(fallback_error.to_string()),
                })
            }
        }
    }

    /// One download-and-unpack attempt.
    async fn restore_from(&self, key: &str) -> Result<()> {
        ObjectKey::parse(key)?;
        debug!(key = %key, destination = %self.destination.display(), "Downloading archive");

        let (mut writer, reader) = pipe(self.pipe_capacity);
        let mut source = SyncIoBridge::new(reader);
        let format = self.format;
        let destination = self.destination.clone();

        let unpack = tokio::task::spawn_blocking(move || format.unpack(&destination, &mut source));

        // Owns the writer: a failed download drops it unfinished, which the
        // unpacker sees as a broken stream rather than a clean end.
        let download = async move {
            let result = self.store.get(key, &mut writer).await;
            if result.is_ok() {
                writer.finish();
            }
            result
        };

        let (unpacked, downloaded) = tokio::join!(unpack, download);
        let unpacked =
            unpacked.map_err(|e| Error::Internal(format!("archive task failed: {}", e)))?;

        first_failure(downloaded, unpacked)
    }
}

/// Combine the results of a producer and its consumer.
///
/// The producer's error wins, unless it only failed because the consumer hung
/// up first; then the consumer's error is the real cause.
fn first_failure(producer: Result<()>, consumer: Result<()>) -> Result<()> {
    match (producer, consumer) {
        (Err(p), Err(c)) if p.is_broken_pipe() => Err(c),
        (Err(p), _) => Err(p),
        (Ok(()), c) => c,
    }
}
