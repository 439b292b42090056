//! Weekly index of captured messages
//!
//! Each ISO week has one JSON document under the mail root listing every
//! transaction summary of that week, newest first. Updates are full
//! read-modify-write cycles serialized per bucket.

use crate::file::FileStorage;
use crate::locks::KeyedLocks;
use mailcatch_common::{BucketName, Error, Result, TransactionSummary, WeeklyIndex};
use std::sync::Arc;
use tracing::{debug, info};

/// Loads, updates and persists weekly indexes
pub struct WeeklyIndexManager<S: FileStorage> {
    storage: Arc<S>,
    locks: KeyedLocks<BucketName>,
}

impl<S: FileStorage> WeeklyIndexManager<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
        }
    }

    /// Load a bucket. A missing or unreadable bucket is an empty one.
    pub async fn load(&self, bucket: BucketName) -> WeeklyIndex {
        let data = match self.storage.read(&bucket.file_name()).await {
            Ok(data) => data,
            Err(Error::NotFound(_)) => return WeeklyIndex::empty(bucket),
            Err(e) => {
                debug!(bucket = %bucket, error = %e, "Index unreadable, starting empty");
                return WeeklyIndex::empty(bucket);
            }
        };

        match serde_json::from_slice::<WeeklyIndex>(&data) {
            Ok(mut index) => {
                index.name = bucket.to_string();
                index
            }
            Err(e) => {
                debug!(bucket = %bucket, error = %e, "Index unparseable, starting empty");
                WeeklyIndex::empty(bucket)
            }
        }
    }

    /// Prepend `summary` to its bucket and persist the whole bucket.
    ///
    /// At most one update per bucket is in flight; other buckets proceed
    /// concurrently.
    pub async fn append_summary(&self, summary: &TransactionSummary) -> Result<WeeklyIndex> {
        let bucket = summary.bucket();
        let _guard = self.locks.lock(bucket).await;

        let mut index = self.load(bucket).await;
        index.prepend(summary.clone());
        self.persist(bucket, &index).await?;

        info!(
            bucket = %bucket,
            message_id = %summary.message_id,
            entries = index.messages.len(),
            "Updated weekly index"
        );

        Ok(index)
    }

    async fn persist(&self, bucket: BucketName, index: &WeeklyIndex) -> Result<()> {
        let body = serde_json::to_vec_pretty(index)
            .map_err(|e| Error::Internal(format!("Failed to serialize index: {}", e)))?;
        self.storage.replace(&bucket.file_name(), &body).await
    }
}
