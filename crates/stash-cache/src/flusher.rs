//! Deletion of stale cache archives.

use chrono::{DateTime, Duration, Utc};
use stash_core::{ObjectKey, ObjectStore, Result, StoredObject};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default age after which a cache archive is considered stale.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

// Keeps `Duration::days` clear of its overflow panic.
const MAX_AGE_LIMIT_DAYS: i64 = 1_000_000;

/// Deletes every object under a prefix that its predicate marks dirty.
pub struct Flusher<F> {
    store: Arc<dyn ObjectStore>,
    dirty: F,
}

impl<F> Flusher<F>
where
    F: Fn(&StoredObject) -> bool + Send + Sync,
{
    pub fn new(store: Arc<dyn ObjectStore>, dirty: F) -> Self {
        Self { store, dirty }
    }

    /// List `prefix` once and delete each dirty object in listing order.
    ///
    /// Stops at the first failed deletion. Returns the number of objects deleted.
    pub async fn flush(&self, prefix: &str) -> Result<usize> {
        ObjectKey::parse(prefix)?;
        info!(prefix = %prefix, "Flushing cache");

        let objects = self.store.list(prefix).await?;
        debug!(prefix = %prefix, count = objects.len(), "Listed cache objects");

        let mut deleted = 0;
        for object in objects.iter().filter(|o| (self.dirty)(o)) {
            debug!(
                key = %object.key,
                last_modified = %object.last_modified,
                "Deleting stale object"
            );
            if let Err(e) = self.store.delete(&object.key).await {
                warn!(key = %object.key, deleted, error = %e, "Flush stopped");
                return Err(e);
            }
            deleted += 1;
        }

        info!(prefix = %prefix, deleted, scanned = objects.len(), "Cache flushed");
        Ok(deleted)
    }
}

/// Age-based staleness rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    max_age: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::days(DEFAULT_MAX_AGE_DAYS)
    }
}

impl ExpiryPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Objects older than `days` days are expired.
    pub fn days(days: i64) -> Self {
        Self::new(Duration::days(days.clamp(-MAX_AGE_LIMIT_DAYS, MAX_AGE_LIMIT_DAYS)))
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Whether `object` was last modified before `now - max_age`.
    pub fn is_expired_at(&self, object: &StoredObject, now: DateTime<Utc>) -> bool {
        match now.checked_sub_signed(self.max_age) {
            Some(cutoff) => object.last_modified < cutoff,
            None => false,
        }
    }

    pub fn is_expired(&self, object: &StoredObject) -> bool {
        self.is_expired_at(object, Utc::now())
    }

    /// Predicate for [`Flusher::new`].
    pub fn predicate(self) -> impl Fn(&StoredObject) -> bool + Send + Sync + 'static {
        move |object| self.is_expired(object)
    }
}
