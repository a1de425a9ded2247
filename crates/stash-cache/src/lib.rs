//! Streaming build cache engine.
//!
//! Packs directories into tar or tar.gz archives and moves them to and from an
//! [`ObjectStore`](stash_core::ObjectStore) without holding the archive in
//! memory or on disk, and flushes archives that outlived their maximum age.

pub mod archive;
pub mod engine;
pub mod flusher;
pub mod pipe;
pub mod store;
pub mod types;

pub use archive::ArchiveFormat;
pub use engine::Cache;
pub use flusher::{ExpiryPolicy, Flusher};
pub use pipe::{DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter, pipe};
pub use store::{FilesystemStore, MemoryStore};
pub use types::RestoreOutcome;
