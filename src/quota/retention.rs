//! Retention Policy Engine
//!
//! Decides which buckets to delete and deletes them, in two ordered passes:
//!
//! 1. **Age pass** - every bucket older than `max_age` whole days is deleted,
//!    whatever its size.
//! 2. **Size pass** - the remaining buckets are evicted oldest-first until the
//!    running total is at or below `max_size`.
//!
//! The passes stay separate: age eligibility does not depend on the quota,
//! and the size pass must stop as soon as the quota is met.
//!
//! # Partial Failure
//!
//! Deletions run one at a time. A bucket that cannot be deleted is recorded
//! as a [`BucketDeleteFailure`] and the pass moves on to the next bucket.
//! Nothing is retried.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::{BucketInfo, EventPublisher, ObjectStore, ReclaimPass};
use crate::error::{Error, Result};
use crate::metrics::QuotaMetrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the retention engine
#[derive(Debug, Clone, Default)]
pub struct RetentionConfig {
    /// Log decisions without deleting anything
    pub dry_run: bool,
}

// =============================================================================
// Decision
// =============================================================================

/// Partition of the current bucket set for one cleanup invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    /// Older than the maximum age, oldest first
    pub expired: Vec<BucketInfo>,
    /// Candidates for size-based eviction, oldest first
    pub retained: Vec<BucketInfo>,
}

impl RetentionDecision {
    /// Split buckets by age. With no maximum age nothing expires.
    pub fn partition(
        mut buckets: Vec<BucketInfo>,
        max_age_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        buckets.sort_by(oldest_first);

        let Some(max_age) = max_age_days else {
            return Self {
                expired: Vec::new(),
                retained: buckets,
            };
        };

        let (expired, retained): (Vec<_>, Vec<_>) = buckets
            .into_iter()
            .partition(|b| b.age_days(now) > i64::from(max_age));
        Self { expired, retained }
    }

    pub fn retained_size(&self) -> u64 {
        self.retained.iter().map(|b| b.size).sum()
    }
}

/// Ascending by last-modified, ties broken by name.
pub fn oldest_first(a: &BucketInfo, b: &BucketInfo) -> Ordering {
    a.last_modified
        .cmp(&b.last_modified)
        .then_with(|| a.name.cmp(&b.name))
}

// =============================================================================
// Outcome
// =============================================================================

/// A bucket that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketDeleteFailure {
    pub bucket: String,
    pub pass: ReclaimPass,
    pub reason: String,
}

/// Result of running both passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionOutcome {
    /// Bytes still held after cleanup
    pub final_size: u64,
    /// Deleted buckets in deletion order, age pass first
    pub deleted: Vec<String>,
    pub failures: Vec<BucketDeleteFailure>,
}

// =============================================================================
// Engine
// =============================================================================

/// Applies the age and size passes against an object store.
pub struct RetentionPolicyEngine {
    store: Arc<dyn ObjectStore>,
    events: Arc<dyn EventPublisher>,
    config: RetentionConfig,
    metrics: Option<QuotaMetrics>,
}

impl RetentionPolicyEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            store,
            events,
            config,
            metrics: None,
        }
    }

    /// Record deletions into `metrics`. Dry runs are never recorded.
    pub fn with_metrics(mut self, metrics: QuotaMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Run the age pass then the size pass.
    ///
    /// # Returns
    /// * Final size and deleted buckets. `final_size` may still exceed
    ///   `max_size` when every size-pass candidate has been tried.
    #[instrument(skip(self, buckets), fields(buckets = buckets.len(), dry_run = self.config.dry_run))]
    pub async fn cleanup(
        &self,
        buckets: Vec<BucketInfo>,
        max_size: u64,
        max_age_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> RetentionOutcome {
        let decision = RetentionDecision::partition(buckets, max_age_days, now);
        debug!(
            expired = decision.expired.len(),
            retained = decision.retained.len(),
            "Partitioned buckets"
        );

        let mut outcome = RetentionOutcome::default();
        let undeleted_expired = self.age_pass(&decision.expired, now, &mut outcome).await;
        let starting_size = undeleted_expired + decision.retained_size();
        self.size_pass(decision.retained, starting_size, max_size, &mut outcome)
            .await;
        outcome
    }

    /// Delete every expired bucket. Returns the bytes of expired buckets that
    /// could not be deleted.
    async fn age_pass(
        &self,
        expired: &[BucketInfo],
        now: DateTime<Utc>,
        outcome: &mut RetentionOutcome,
    ) -> u64 {
        let mut undeleted = 0u64;

        for bucket in expired {
            let age = bucket.age_days(now);
            match self.remove(&bucket.name).await {
                Ok(()) => {
                    info!("Deleted {} due to age: {} days", bucket.name, age);
                    self.count_deleted(ReclaimPass::Age, bucket.size);
                    outcome.deleted.push(bucket.name.clone());
                    self.publish(DomainEvent::bucket_expired(&bucket.name, bucket.size, age))
                        .await;
                }
                Err(e) => {
                    warn!("Error deleting {} due to age: {} days: {}", bucket.name, age, e);
                    undeleted += bucket.size;
                    self.record_failure(outcome, &bucket.name, ReclaimPass::Age, &e)
                        .await;
                }
            }
        }

        undeleted
    }

    /// Evict retained buckets oldest-first while over quota.
    ///
    /// `current_size` covers the candidates plus expired buckets whose
    /// deletion already failed, which this pass cannot reclaim.
    async fn size_pass(
        &self,
        candidates: Vec<BucketInfo>,
        mut current_size: u64,
        max_size: u64,
        outcome: &mut RetentionOutcome,
    ) {

        let mut idx = 0;
        while current_size > max_size && idx < candidates.len() {
            let bucket = &candidates[idx];
            idx += 1;

            match self.remove(&bucket.name).await {
                Ok(()) => {
                    current_size -= bucket.size;
                    info!("Deleted {} due to storage limits", bucket.name);
                    self.count_deleted(ReclaimPass::Size, bucket.size);
                    outcome.deleted.push(bucket.name.clone());
                    self.publish(DomainEvent::bucket_evicted(
                        &bucket.name,
                        bucket.size,
                        current_size,
                    ))
                    .await;
                }
                Err(e) => {
                    warn!("Error deleting {} due to storage limits: {}", bucket.name, e);
                    self.record_failure(outcome, &bucket.name, ReclaimPass::Size, &e)
                        .await;
                }
            }
        }

        if current_size > max_size {
            warn!(
                current_size,
                max_size, "Storage still over quota after evicting every candidate"
            );
        }
        outcome.final_size = current_size;
    }

    async fn remove(&self, bucket: &str) -> Result<()> {
        if self.config.dry_run {
            info!("[DRY-RUN] Would delete bucket {}", bucket);
            return Ok(());
        }
        delete_bucket(self.store.as_ref(), bucket).await
    }

    fn count_deleted(&self, pass: ReclaimPass, bytes: u64) {
        if self.config.dry_run {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_deleted(pass, bytes);
        }
    }

    async fn record_failure(
        &self,
        outcome: &mut RetentionOutcome,
        bucket: &str,
        pass: ReclaimPass,
        error: &Error,
    ) {
        if let Some(metrics) = &self.metrics {
            metrics.record_delete_failure(pass);
        }
        let reason = error.to_string();
        outcome.failures.push(BucketDeleteFailure {
            bucket: bucket.to_string(),
            pass,
            reason: reason.clone(),
        });
        self.publish(DomainEvent::bucket_delete_failed(bucket, pass, reason))
            .await;
    }

    async fn publish(&self, event: DomainEvent) {
        let event = if self.config.dry_run {
            event.simulated()
        } else {
            event
        };
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish retention event: {}", e);
        }
    }
}

// =============================================================================
// Bucket Deletion
// =============================================================================

/// Delete a bucket and everything in it.
///
/// Deleting an absent bucket succeeds as a no-op, including one that another
/// writer removes part-way through. Objects are removed first,
/// then the empty bucket; the two steps are not atomic, and an interrupted
/// deletion leaves an empty bucket behind that a later call removes.
pub async fn delete_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    if !store.bucket_exists(bucket).await? {
        debug!("Bucket {} already absent", bucket);
        return Ok(());
    }

    let objects = match store.list_objects(bucket).await {
        Ok(objects) => objects,
        Err(Error::BucketNotFound(_)) => {
            debug!("Bucket {} removed concurrently", bucket);
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if !objects.is_empty() {
        let failures = match store.remove_objects(bucket, &objects).await {
            Ok(failures) => failures,
            Err(Error::BucketNotFound(_)) => {
                debug!("Bucket {} removed concurrently", bucket);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !failures.is_empty() {
            return Err(Error::PartialDeleteFailure {
                bucket: bucket.to_string(),
                failures,
            });
        }
    }

    match store.remove_bucket(bucket).await {
        Ok(()) => Ok(()),
        Err(Error::BucketNotFound(_)) => Ok(()),
        Err(e) => Err(Error::BucketDeleteFailure {
            bucket: bucket.to_string(),
            reason: format!("objects removed but bucket removal failed: {}", e),
        }),
    }
}
