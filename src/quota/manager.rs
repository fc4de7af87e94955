//! Quota Manager
//!
//! Facade over the object store, the stats aggregator and the retention
//! engine. This is the surface scheduled cleanup jobs and admin commands use.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::aggregator::{AggregatorConfig, BucketStats, BucketStatsAggregator, BucketStatsError};
use super::retention::{BucketDeleteFailure, RetentionConfig, RetentionPolicyEngine};
use crate::adapters::LoggingEventPublisher;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, ObjectStore};
use crate::error::{Error, Result};
use crate::metrics::QuotaMetrics;

// =============================================================================
// Configuration
// =============================================================================

/// What to do when some buckets could not be measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsFailurePolicy {
    /// Refuse to report usage or clean up on an incomplete picture
    #[default]
    Abort,
    /// Carry on with the buckets that were measured
    Partial,
}

impl FromStr for StatsFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(StatsFailurePolicy::Abort),
            "partial" => Ok(StatsFailurePolicy::Partial),
            other => Err(Error::Config(format!(
                "unknown stats failure policy '{}', expected 'abort' or 'partial'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StatsFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsFailurePolicy::Abort => write!(f, "abort"),
            StatsFailurePolicy::Partial => write!(f, "partial"),
        }
    }
}

/// Configuration for the quota manager
#[derive(Debug, Clone, Default)]
pub struct QuotaConfig {
    pub aggregator: AggregatorConfig,
    pub retention: RetentionConfig,
    pub stats_failure_policy: StatsFailurePolicy,
}

// =============================================================================
// Results
// =============================================================================

/// Per-object result of a batch delete. `error_message` is empty on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectDeleteOutcome {
    pub object_name: String,
    pub error_message: String,
}

impl ObjectDeleteOutcome {
    pub fn is_success(&self) -> bool {
        self.error_message.is_empty()
    }
}

/// Result of one `cleanup_storage` call.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub run_id: Uuid,
    pub max_size: u64,
    pub max_age_days: Option<u32>,
    /// Bytes still held by measured buckets
    pub final_size: u64,
    /// Deleted buckets in deletion order
    pub deleted_buckets: Vec<String>,
    pub failed_deletions: Vec<BucketDeleteFailure>,
    /// Buckets left untouched because they could not be measured
    pub stats_errors: Vec<BucketStatsError>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CleanupReport {
    pub fn within_quota(&self) -> bool {
        self.final_size <= self.max_size
    }

    /// `(final_size, deleted_buckets)`
    pub fn into_parts(self) -> (u64, Vec<String>) {
        (self.final_size, self.deleted_buckets)
    }
}

// =============================================================================
// Quota Manager
// =============================================================================

/// Storage quota facade.
pub struct QuotaManager {
    store: Arc<dyn ObjectStore>,
    aggregator: BucketStatsAggregator,
    engine: RetentionPolicyEngine,
    events: Arc<dyn EventPublisher>,
    metrics: QuotaMetrics,
    config: QuotaConfig,
}

impl QuotaManager {
    /// Create a manager that audits through the tracing subscriber.
    pub fn new(store: Arc<dyn ObjectStore>, config: QuotaConfig) -> Result<Self> {
        Self::with_event_publisher(store, config, Arc::new(LoggingEventPublisher::new()))
    }

    pub fn with_event_publisher(
        store: Arc<dyn ObjectStore>,
        config: QuotaConfig,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let metrics = QuotaMetrics::new()?;
        let aggregator = BucketStatsAggregator::new(store.clone(), config.aggregator.clone());
        let engine =
            RetentionPolicyEngine::new(store.clone(), events.clone(), config.retention.clone())
                .with_metrics(metrics.clone());

        Ok(Self {
            store,
            aggregator,
            engine,
            events,
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn metrics(&self) -> &QuotaMetrics {
        &self.metrics
    }

    // =========================================================================
    // Usage
    // =========================================================================

    /// Measure every bucket in the store.
    ///
    /// Always returns partial results; the stats failure policy is not
    /// applied here.
    pub async fn bucket_infos(&self) -> Result<BucketStats> {
        self.bucket_infos_at(Utc::now()).await
    }

    async fn bucket_infos_at(&self, now: DateTime<Utc>) -> Result<BucketStats> {
        let buckets = self.store.list_buckets().await?;
        let stats = self.aggregator.aggregate(buckets, now).await;
        if !stats.errors.is_empty() {
            self.metrics.record_stats_errors(stats.errors.len());
        }
        Ok(stats)
    }

    /// Total bytes used across all buckets. Never deletes anything.
    #[instrument(skip(self))]
    pub async fn get_storage_used(&self) -> Result<u64> {
        let stats = self.bucket_infos().await?;
        let stats = self.apply_failure_policy(stats)?;
        let total = stats.total_size();
        self.metrics.record_storage_used(total);
        debug!(total, buckets = stats.buckets.len(), "Measured storage");
        Ok(total)
    }

    fn apply_failure_policy(&self, stats: BucketStats) -> Result<BucketStats> {
        match self.config.stats_failure_policy {
            StatsFailurePolicy::Abort => stats.require_complete(),
            StatsFailurePolicy::Partial => {
                if !stats.is_complete() {
                    warn!(
                        failed = stats.errors.len(),
                        "Proceeding with partial storage statistics"
                    );
                }
                Ok(stats)
            }
        }
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Delete expired buckets, then the oldest buckets until usage is at or
    /// below `max_size`.
    pub async fn cleanup_storage(
        &self,
        max_size: u64,
        max_age_days: Option<u32>,
    ) -> Result<CleanupReport> {
        self.cleanup_storage_at(max_size, max_age_days, Utc::now())
            .await
    }

    /// Same as [`cleanup_storage`](Self::cleanup_storage), evaluating ages at `now`.
    #[instrument(skip(self, now))]
    pub async fn cleanup_storage_at(
        &self,
        max_size: u64,
        max_age_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, max_size, ?max_age_days, "Starting storage cleanup");

        let stats = self.bucket_infos_at(now).await?;
        let BucketStats { buckets, errors } = self.apply_failure_policy(stats)?;

        let outcome = self
            .engine
            .cleanup(buckets, max_size, max_age_days, now)
            .await;

        let dry_run = self.engine.is_dry_run();
        if !dry_run {
            self.metrics.record_cleanup(outcome.final_size);
        }

        let report = CleanupReport {
            run_id,
            max_size,
            max_age_days,
            final_size: outcome.final_size,
            deleted_buckets: outcome.deleted,
            failed_deletions: outcome.failures,
            stats_errors: errors,
            dry_run,
            started_at,
            finished_at: Utc::now(),
        };

        if let Err(e) = self
            .events
            .publish(DomainEvent::cleanup_completed(
                run_id,
                report.final_size,
                max_size,
                report.deleted_buckets.len(),
                report.failed_deletions.len(),
            ))
            .await
        {
            warn!("Failed to publish cleanup event: {}", e);
        }

        info!(
            %run_id,
            final_size = report.final_size,
            deleted = report.deleted_buckets.len(),
            failed = report.failed_deletions.len(),
            "Storage cleanup finished"
        );
        if !report.within_quota() {
            warn!(
                final_size = report.final_size,
                max_size, "Storage remains over quota"
            );
        }

        Ok(report)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Upload a local file. Fails with `SourceFileMissing` before touching
    /// the store if `path` is not a regular file.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn upload_file(&self, bucket: &str, object: &str, path: &Path) -> Result<()> {
        let is_file = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        };
        if !is_file {
            error!("Can't upload {}: not present or not a file", path.display());
            return Err(Error::SourceFileMissing {
                path: path.to_path_buf(),
            });
        }

        self.store.put_object(bucket, object, path).await?;
        debug!("Uploaded {} to {}/{}", path.display(), bucket, object);
        Ok(())
    }

    /// Download an object to `dest`, which must not already exist.
    ///
    /// The store's transfer handle is released on every exit path.
    ///
    /// # Returns
    /// * Number of bytes written
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn get_file(&self, bucket: &str, object: &str, dest: &Path) -> Result<u64> {
        let mut transfer = self.store.get_object(bucket, object).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .await
            .map_err(|e| {
                error!("Cannot create {}: {}", dest.display(), e);
                Error::Io(e)
            })?;

        let copied = async {
            let bytes = tokio::io::copy(transfer.reader_mut(), &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;
        transfer.release();

        match copied {
            Ok(bytes) => {
                debug!("Downloaded {}/{} ({} bytes)", bucket, object, bytes);
                Ok(bytes)
            }
            Err(e) => {
                error!("Got an error while getting {}/{}: {}", bucket, object, e);
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(dest).await {
                    warn!("Failed to remove partial download {}: {}", dest.display(), cleanup);
                }
                Err(Error::Io(e))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        self.store.remove_object(bucket, object).await
    }

    /// Delete several objects.
    ///
    /// # Returns
    /// * One outcome per requested object; inspect each, partial failure is
    ///   not an error
    #[instrument(skip(self, objects), fields(count = objects.len()))]
    pub async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[String],
    ) -> Result<Vec<ObjectDeleteOutcome>> {
        let failures = self.store.remove_objects(bucket, objects).await?;
        let mut messages: HashMap<String, String> = failures
            .into_iter()
            .map(|f| (f.object_name, f.message))
            .collect();

        let outcomes: Vec<ObjectDeleteOutcome> = objects
            .iter()
            .map(|name| ObjectDeleteOutcome {
                object_name: name.clone(),
                error_message: messages.remove(name).unwrap_or_default(),
            })
            .collect();

        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            warn!(
                "Failed to delete {}/{}: {}",
                bucket, outcome.object_name, outcome.error_message
            );
        }
        Ok(outcomes)
    }

    // =========================================================================
    // Buckets
    // =========================================================================

    pub async fn get_buckets(&self) -> Result<Vec<String>> {
        self.store.list_buckets().await
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.store.make_bucket(bucket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryObjectStore};
    use crate::domain::ports::ReclaimPass;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn ts(year: i32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 10, 1, 10, minute, 10).unwrap()
    }

    fn seeded() -> Arc<InMemoryObjectStore> {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert_sized("bucket1", "object1", 10, ts(2021, 10));
        store.insert_sized("bucket1", "object2", 20, ts(2021, 11));
        store.insert_sized("bucket1", "object3", 30, ts(2021, 12));
        store.insert_sized("bucket2", "object4", 100, ts(2020, 10));
        store.insert_sized("bucket2", "object5", 200, ts(2020, 11));
        store.insert_sized("bucket2", "object6", 300, ts(2020, 12));
        store
    }

    fn manager(
        store: Arc<InMemoryObjectStore>,
        config: QuotaConfig,
    ) -> (QuotaManager, Arc<InMemoryEventCollector>) {
        let events = Arc::new(InMemoryEventCollector::new());
        let manager = QuotaManager::with_event_publisher(store, config, events.clone()).unwrap();
        (manager, events)
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "abort".parse::<StatsFailurePolicy>().unwrap(),
            StatsFailurePolicy::Abort
        );
        assert_eq!(
            "Partial".parse::<StatsFailurePolicy>().unwrap(),
            StatsFailurePolicy::Partial
        );
        assert_matches!("sometimes".parse::<StatsFailurePolicy>(), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_get_storage_used() {
        let (manager, _) = manager(seeded(), QuotaConfig::default());
        assert_eq!(manager.get_storage_used().await.unwrap(), 660);
        assert_eq!(manager.metrics().storage_used(), 660);
    }

    #[tokio::test]
    async fn test_storage_used_on_empty_store() {
        let store = Arc::new(InMemoryObjectStore::new());
        let (manager, _) = manager(store, QuotaConfig::default());
        assert_eq!(manager.get_storage_used().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abort_policy_rejects_incomplete_stats() {
        let store = seeded();
        store.fail_listing("bucket2");
        let (manager, _) = manager(store.clone(), QuotaConfig::default());

        assert_matches!(
            manager.get_storage_used().await,
            Err(Error::IncompleteStats { failed: 1, .. })
        );
        assert_matches!(
            manager.cleanup_storage(70, None).await,
            Err(Error::IncompleteStats { .. })
        );
        assert_eq!(store.list_buckets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_policy_cleans_measured_buckets_only() {
        let store = seeded();
        store.fail_listing("bucket1");
        let config = QuotaConfig {
            stats_failure_policy: StatsFailurePolicy::Partial,
            ..Default::default()
        };
        let (manager, _) = manager(store.clone(), config);

        assert_eq!(manager.get_storage_used().await.unwrap(), 600);

        let report = manager.cleanup_storage(70, None).await.unwrap();
        assert_eq!(report.deleted_buckets, vec!["bucket2"]);
        assert_eq!(report.final_size, 0);
        assert_eq!(report.stats_errors.len(), 1);
        assert_eq!(report.stats_errors[0].bucket, "bucket1");
        assert!(store.contains_bucket("bucket1"));
    }

    #[tokio::test]
    async fn test_cleanup_reports_and_publishes() {
        let store = seeded();
        let (manager, events) = manager(store, QuotaConfig::default());

        let report = manager
            .cleanup_storage_at(70, Some(3650), ts(2021, 30))
            .await
            .unwrap();

        assert_eq!(report.final_size, 60);
        assert_eq!(report.deleted_buckets, vec!["bucket2"]);
        assert!(report.within_quota());
        assert!(!report.dry_run);
        assert_eq!(events.events_of_type("CleanupCompleted").len(), 1);
        assert_eq!(manager.metrics().cleanup_runs(), 1);
        assert_eq!(manager.metrics().buckets_deleted(ReclaimPass::Size), 1);

        let (final_size, deleted) = report.into_parts();
        assert_eq!((final_size, deleted), (60, vec!["bucket2".to_string()]));
    }

    #[tokio::test]
    async fn test_dry_run_cleanup_keeps_buckets() {
        let store = seeded();
        let config = QuotaConfig {
            retention: RetentionConfig { dry_run: true },
            ..Default::default()
        };
        let (manager, _) = manager(store.clone(), config);

        let report = manager.cleanup_storage(70, None).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.deleted_buckets, vec!["bucket2"]);
        assert!(store.contains_bucket("bucket2"));
        assert_eq!(manager.metrics().cleanup_runs(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_propagates() {
        let store = seeded();
        store.set_unavailable(true);
        let (manager, _) = manager(store, QuotaConfig::default());

        assert_matches!(
            manager.cleanup_storage(70, None).await,
            Err(Error::ObjectStoreUnavailable(_))
        );
        assert_matches!(manager.get_buckets().await, Err(Error::ObjectStoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_upload_requires_regular_file() {
        let store = seeded();
        store.set_unavailable(true);
        let (manager, _) = manager(store, QuotaConfig::default());
        let dir = tempfile::tempdir().unwrap();

        // Checked before any store call, so the unavailable store is never hit
        assert_matches!(
            manager
                .upload_file("bucket1", "x", &dir.path().join("missing"))
                .await,
            Err(Error::SourceFileMissing { .. })
        );
        assert_matches!(
            manager.upload_file("bucket1", "x", dir.path()).await,
            Err(Error::SourceFileMissing { .. })
        );
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let store = seeded();
        let (manager, _) = manager(store.clone(), QuotaConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input.bin");
        std::fs::write(&src, b"hello quota").unwrap();

        manager.upload_file("bucket1", "greeting", &src).await.unwrap();
        assert_eq!(
            store.object_data("bucket1", "greeting").unwrap().as_ref(),
            b"hello quota"
        );

        let dest = dir.path().join("output.bin");
        let bytes = manager.get_file("bucket1", "greeting", &dest).await.unwrap();
        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello quota");
        assert_eq!(store.open_transfers(), 0);
    }

    #[tokio::test]
    async fn test_failed_download_releases_transfer() {
        let store = seeded();
        let (manager, _) = manager(store.clone(), QuotaConfig::default());
        let dir = tempfile::tempdir().unwrap();

        let existing = dir.path().join("exists.bin");
        std::fs::write(&existing, b"keep").unwrap();
        assert_matches!(
            manager.get_file("bucket1", "object1", &existing).await,
            Err(Error::Io(_))
        );
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep");
        assert_eq!(store.open_transfers(), 0);

        let unreachable = dir.path().join("no-such-dir").join("out.bin");
        assert!(manager
            .get_file("bucket1", "object1", &unreachable)
            .await
            .is_err());
        assert_eq!(store.open_transfers(), 0);
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let (manager, _) = manager(seeded(), QuotaConfig::default());
        let dir = tempfile::tempdir().unwrap();

        assert_matches!(
            manager
                .get_file("bucket1", "nope", &dir.path().join("out"))
                .await,
            Err(Error::ObjectNotFound { .. })
        );
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_delete_objects_reports_each_object() {
        let store = Arc::new(InMemoryObjectStore::new());
        for name in ["o1", "o2", "o3"] {
            store.insert_sized("b", name, 1, ts(2021, 10));
        }
        store.fail_removal("b", "o2");
        let (manager, _) = manager(store.clone(), QuotaConfig::default());

        let names: Vec<String> = vec!["o1".into(), "o2".into(), "o3".into()];
        let outcomes = manager.delete_objects("b", &names).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[1].object_name, "o2");
        assert!(!outcomes[1].error_message.is_empty());
        assert!(outcomes[2].is_success());
        assert_eq!(store.object_count("b"), 1);
    }

    #[tokio::test]
    async fn test_bucket_passthrough() {
        let store = Arc::new(InMemoryObjectStore::new());
        let (manager, _) = manager(store, QuotaConfig::default());

        manager.create_bucket("zeta").await.unwrap();
        manager.create_bucket("alpha").await.unwrap();
        assert_eq!(manager.get_buckets().await.unwrap(), vec!["alpha", "zeta"]);

        manager.delete_object("alpha", "missing").await.unwrap();
    }
}
