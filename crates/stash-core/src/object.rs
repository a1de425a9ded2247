//! Listed storage objects.

use chrono::{DateTime, Utc};

/// An object as reported by [`ObjectStore::list`](crate::ObjectStore::list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Full `bucket/object-key` path, usable as a key for `get` or `delete`.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
        }
    }
}
