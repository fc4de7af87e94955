//! In-Memory Object Store
//!
//! `DashMap`-backed store for tests and embedders. Objects carry explicit
//! timestamps so retention decisions can be exercised against fixed dates,
//! and faults can be injected per bucket or per object.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::domain::ports::{ObjectDeleteError, ObjectStat, ObjectStore, ObjectTransfer};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    listing: HashSet<String>,
    stat: HashSet<(String, String)>,
    removal: HashSet<(String, String)>,
    bucket_removal: HashSet<String>,
    stale_buckets: HashSet<String>,
    stale_objects: HashSet<(String, String)>,
}

/// In-memory object store.
pub struct InMemoryObjectStore {
    buckets: DashMap<String, DashMap<String, StoredObject>>,
    faults: RwLock<FaultPlan>,
    unavailable: AtomicBool,
    listing_latency: RwLock<Option<Duration>>,
    open_transfers: Arc<AtomicUsize>,
    active_listings: AtomicUsize,
    peak_listings: AtomicUsize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self {
            buckets: DashMap::new(),
            faults: RwLock::new(FaultPlan::default()),
            unavailable: AtomicBool::new(false),
            listing_latency: RwLock::new(None),
            open_transfers: Arc::new(AtomicUsize::new(0)),
            active_listings: AtomicUsize::new(0),
            peak_listings: AtomicUsize::new(0),
        }
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("buckets", &self.buckets.len())
            .field("open_transfers", &self.open_transfers())
            .finish()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Store an object, creating its bucket if needed.
    pub fn insert_object(
        &self,
        bucket: &str,
        object: &str,
        data: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
    ) {
        let objects = self
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(DashMap::new);
        objects.insert(
            object.to_string(),
            StoredObject {
                data: data.into(),
                last_modified,
            },
        );
    }

    /// Store a zero-filled object of `size` bytes.
    pub fn insert_sized(
        &self,
        bucket: &str,
        object: &str,
        size: usize,
        last_modified: DateTime<Utc>,
    ) {
        self.insert_object(bucket, object, vec![0u8; size], last_modified);
    }

    /// Create an empty bucket.
    pub fn insert_bucket(&self, bucket: &str) {
        self.buckets
            .entry(bucket.to_string())
            .or_insert_with(DashMap::new);
    }

    pub fn contains_bucket(&self, bucket: &str) -> bool {
        self.buckets.contains_key(bucket)
    }

    pub fn object_data(&self, bucket: &str, object: &str) -> Option<Bytes> {
        self.buckets
            .get(bucket)
            .and_then(|objects| objects.get(object).map(|o| o.data.clone()))
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets.get(bucket).map(|o| o.len()).unwrap_or(0)
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Make every call fail with `ObjectStoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_listing(&self, bucket: &str) {
        self.faults.write().listing.insert(bucket.to_string());
    }

    pub fn fail_stat(&self, bucket: &str, object: &str) {
        self.faults
            .write()
            .stat
            .insert((bucket.to_string(), object.to_string()));
    }

    pub fn fail_removal(&self, bucket: &str, object: &str) {
        self.faults
            .write()
            .removal
            .insert((bucket.to_string(), object.to_string()));
    }

    pub fn fail_bucket_removal(&self, bucket: &str) {
        self.faults.write().bucket_removal.insert(bucket.to_string());
    }

    /// Keep listing a bucket that no longer exists, as when another writer
    /// removes it right after a listing.
    pub fn stale_bucket_listing(&self, bucket: &str) {
        self.faults.write().stale_buckets.insert(bucket.to_string());
    }

    /// Keep listing an object that no longer exists in `bucket`.
    pub fn stale_object_listing(&self, bucket: &str, object: &str) {
        self.faults
            .write()
            .stale_objects
            .insert((bucket.to_string(), object.to_string()));
    }

    pub fn clear_faults(&self) {
        *self.faults.write() = FaultPlan::default();
        self.set_unavailable(false);
    }

    /// Delay each object listing, so overlapping listings become observable.
    pub fn set_listing_latency(&self, latency: Duration) {
        *self.listing_latency.write() = Some(latency);
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Download handles acquired and not yet released.
    pub fn open_transfers(&self) -> usize {
        self.open_transfers.load(Ordering::SeqCst)
    }

    /// Highest number of object listings that ran at the same time.
    pub fn peak_concurrent_listings(&self) -> usize {
        self.peak_listings.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::ObjectStoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn require_bucket(&self, bucket: &str) -> Result<()> {
        if self.buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(Error::BucketNotFound(bucket.to_string()))
        }
    }

    fn removal_fails(&self, bucket: &str, object: &str) -> bool {
        self.faults
            .read()
            .removal
            .contains(&(bucket.to_string(), object.to_string()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_buckets(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let mut names: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        for stale in &self.faults.read().stale_buckets {
            if !self.buckets.contains_key(stale) {
                names.push(stale.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.buckets.contains_key(bucket) || self.faults.read().stale_buckets.contains(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        self.check_available()?;
        if bucket.is_empty() {
            return Err(Error::InvalidName {
                name: bucket.to_string(),
                reason: "bucket name must not be empty".to_string(),
            });
        }
        if self.buckets.contains_key(bucket) {
            return Err(Error::BucketAlreadyExists(bucket.to_string()));
        }
        self.insert_bucket(bucket);
        Ok(())
    }

    async fn remove_bucket(&self, bucket: &str) -> Result<()> {
        self.check_available()?;
        if self.faults.read().bucket_removal.contains(bucket) {
            return Err(Error::ObjectStoreUnavailable(format!(
                "injected failure removing bucket {bucket}"
            )));
        }
        let is_empty = match self.buckets.get(bucket) {
            Some(objects) => objects.is_empty(),
            None => return Err(Error::BucketNotFound(bucket.to_string())),
        };
        if !is_empty {
            return Err(Error::BucketNotEmpty(bucket.to_string()));
        }
        self.buckets.remove(bucket);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        self.check_available()?;

        let active = self.active_listings.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_listings.fetch_max(active, Ordering::SeqCst);
        let latency = *self.listing_latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.active_listings.fetch_sub(1, Ordering::SeqCst);

        if self.faults.read().listing.contains(bucket) {
            return Err(Error::ObjectStoreUnavailable(format!(
                "injected failure listing bucket {bucket}"
            )));
        }
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let mut names: Vec<String> = objects.iter().map(|e| e.key().clone()).collect();
        for (stale_bucket, stale) in &self.faults.read().stale_objects {
            if stale_bucket == bucket && !objects.contains_key(stale) {
                names.push(stale.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat> {
        self.check_available()?;
        if self
            .faults
            .read()
            .stat
            .contains(&(bucket.to_string(), object.to_string()))
        {
            return Err(Error::ObjectStoreUnavailable(format!(
                "injected failure stating {bucket}/{object}"
            )));
        }
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        let stored = objects.get(object).ok_or_else(|| Error::ObjectNotFound {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })?;
        Ok(ObjectStat {
            size: stored.data.len() as u64,
            last_modified: stored.last_modified,
        })
    }

    async fn remove_object(&self, bucket: &str, object: &str) -> Result<()> {
        self.check_available()?;
        if self.removal_fails(bucket, object) {
            return Err(Error::ObjectStoreUnavailable(format!(
                "injected failure removing {bucket}/{object}"
            )));
        }
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        // S3 semantics: removing a missing key succeeds
        objects.remove(object);
        Ok(())
    }

    async fn remove_objects(
        &self,
        bucket: &str,
        objects: &[String],
    ) -> Result<Vec<ObjectDeleteError>> {
        self.check_available()?;
        let stored = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;

        let mut errors = Vec::new();
        for object in objects {
            if self.removal_fails(bucket, object) {
                errors.push(ObjectDeleteError::new(object, "AccessDenied: injected failure"));
                continue;
            }
            stored.remove(object);
        }
        Ok(errors)
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<ObjectTransfer> {
        self.check_available()?;
        let data = {
            let objects = self
                .buckets
                .get(bucket)
                .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
            let stored = objects.get(object).ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            })?;
            stored.data.clone()
        };

        self.open_transfers.fetch_add(1, Ordering::SeqCst);
        let open = self.open_transfers.clone();
        Ok(
            ObjectTransfer::new(std::io::Cursor::new(data)).with_release(move || {
                open.fetch_sub(1, Ordering::SeqCst);
            }),
        )
    }

    async fn put_object(&self, bucket: &str, object: &str, src: &Path) -> Result<()> {
        self.check_available()?;
        self.require_bucket(bucket)?;
        let data = tokio::fs::read(src).await?;
        self.insert_object(bucket, object, data, Utc::now());
        Ok(())
    }
}
