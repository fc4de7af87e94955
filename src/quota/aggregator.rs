//! Bucket Stats Aggregator
//!
//! Computes a [`BucketInfo`] per bucket by listing and stating every object.
//! Buckets are measured concurrently on a bounded pool of tokio tasks; the
//! pool size is fixed at construction.
//!
//! # Failure Policy
//!
//! Aggregation always returns partial results: a bucket whose listing or
//! stats fail (or whose task panics) is reported in [`BucketStats::errors`]
//! and never stops its siblings. Whether an incomplete picture is acceptable
//! is decided by the caller.
//!
//! Other writers may change the store while it is measured. An object that
//! disappears between listing and stat is skipped, and a bucket that
//! disappears before it is listed is left out of the result.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::domain::ports::{BucketInfo, ObjectStore};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stats aggregator
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Number of buckets measured concurrently. 1 means fully sequential.
    pub workers: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

impl AggregatorConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }
}

// =============================================================================
// Results
// =============================================================================

/// A bucket that could not be measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStatsError {
    pub bucket: String,
    pub message: String,
}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketStats {
    /// Measured buckets, sorted by name
    pub buckets: Vec<BucketInfo>,
    /// Buckets that could not be measured, sorted by name
    pub errors: Vec<BucketStatsError>,
}

impl BucketStats {
    /// Sum of all measured bucket sizes.
    pub fn total_size(&self) -> u64 {
        self.buckets.iter().map(|b| b.size).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fail with `IncompleteStats` if any bucket could not be measured.
    pub fn require_complete(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(Error::IncompleteStats {
            failed: self.errors.len(),
            buckets: self.errors.iter().map(|e| e.bucket.clone()).collect(),
        })
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Measures bucket size and age across a bounded worker pool.
pub struct BucketStatsAggregator {
    store: Arc<dyn ObjectStore>,
    config: AggregatorConfig,
}

impl BucketStatsAggregator {
    pub fn new(store: Arc<dyn ObjectStore>, config: AggregatorConfig) -> Self {
        Self { store, config }
    }

    /// Effective pool size.
    pub fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    /// Measure a single bucket.
    ///
    /// An empty bucket is sized 0 and dated `now`.
    pub async fn bucket_info(&self, bucket: &str, now: DateTime<Utc>) -> Result<BucketInfo> {
        measure_bucket(self.store.as_ref(), bucket, now).await
    }

    /// Measure every bucket in `buckets`.
    #[instrument(skip(self, buckets), fields(buckets = buckets.len(), workers = self.workers()))]
    pub async fn aggregate(&self, buckets: Vec<String>, now: DateTime<Utc>) -> BucketStats {
        if buckets.is_empty() {
            return BucketStats::default();
        }

        let permits = Arc::new(Semaphore::new(self.workers()));
        let mut pending: BTreeSet<String> = buckets.iter().cloned().collect();
        let mut join_set = JoinSet::new();

        for bucket in buckets {
            let store = self.store.clone();
            let permits = permits.clone();
            join_set.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await;
                let result = measure_bucket(store.as_ref(), &bucket, now).await;
                (bucket, result)
            });
        }

        let mut stats = BucketStats::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((bucket, Ok(info))) => {
                    debug!(
                        bucket = %bucket,
                        size = info.size,
                        last_modified = %info.last_modified,
                        "Measured bucket"
                    );
                    pending.remove(&bucket);
                    stats.buckets.push(info);
                }
                Ok((bucket, Err(Error::BucketNotFound(_)))) => {
                    // Removed by another writer after the bucket listing
                    debug!(bucket = %bucket, "Bucket vanished before it was measured");
                    pending.remove(&bucket);
                }
                Ok((bucket, Err(e))) => {
                    warn!(bucket = %bucket, error = %e, "Failed to measure bucket");
                    pending.remove(&bucket);
                    stats.errors.push(BucketStatsError {
                        bucket,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    // Bucket is identified below from what never reported back
                    warn!(error = %e, "Bucket measurement task failed");
                }
            }
        }

        for bucket in pending {
            stats.errors.push(BucketStatsError {
                bucket,
                message: "measurement task aborted".to_string(),
            });
        }

        stats.buckets.sort_by(|a, b| a.name.cmp(&b.name));
        stats.errors.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        stats
    }
}

async fn measure_bucket(
    store: &dyn ObjectStore,
    bucket: &str,
    now: DateTime<Utc>,
) -> Result<BucketInfo> {
    let objects = store.list_objects(bucket).await?;

    let mut size = 0u64;
    let mut last_modified = now;
    for object in &objects {
        let stat = match store.stat_object(bucket, object).await {
            Ok(stat) => stat,
            Err(e) if e.is_not_found() => {
                debug!(bucket, object = %object, "Object vanished before it was measured");
                continue;
            }
            Err(e) => return Err(e),
        };
        size += stat.size;
        if stat.last_modified < last_modified {
            last_modified = stat.last_modified;
        }
    }

    Ok(BucketInfo::new(bucket, size, last_modified))
}
