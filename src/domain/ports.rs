//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the quota engine depends on.
//! Infrastructure adapters implement these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Quota Layer                             │
//! │   BucketStatsAggregator │ RetentionPolicyEngine │ Manager   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Ports (Traits)                            │
//! │            ObjectStore │ EventPublisher                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Adapters (Impls)                            │
//! │  FilesystemObjectStore │ InMemoryObjectStore │ Publishers   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use super::events::DomainEvent;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Size and age of a bucket, derived live from the store.
///
/// `last_modified` is the *earliest* last-modified time among the bucket's
/// objects, so a single stale object keeps the whole bucket old.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl BucketInfo {
    pub fn new(name: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified,
        }
    }

    /// Age in whole days at `now`. Negative if the bucket is dated in the future.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_modified).num_days()
    }
}

/// Which retention pass removed (or tried to remove) a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimPass {
    /// Bucket exceeded the maximum age
    Age,
    /// Bucket was evicted to bring usage under quota
    Size,
}

impl ReclaimPass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimPass::Age => "age",
            ReclaimPass::Size => "size",
        }
    }
}

impl std::fmt::Display for ReclaimPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata returned by a stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One object that a batch removal could not delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDeleteError {
    pub object_name: String,
    pub message: String,
}

impl ObjectDeleteError {
    pub fn new(object_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Transfer Handle
// =============================================================================

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Scoped download handle.
///
/// Holds the store's read stream plus whatever connection or file resource
/// backs it. The resource is released exactly once, when the handle is
/// dropped, so every exit path out of a transfer gives it back.
pub struct ObjectTransfer {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    on_release: Option<ReleaseHook>,
}

impl ObjectTransfer {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            on_release: None,
        }
    }

    /// Attach a hook run when the handle is released.
    pub fn with_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn reader_mut(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.reader.as_mut()
    }

    /// Release the handle explicitly. Same as dropping it.
    pub fn release(self) {}
}

impl Drop for ObjectTransfer {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for ObjectTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTransfer")
            .field("releasable", &self.on_release.is_some())
            .finish()
    }
}

// =============================================================================
// Object Store Port
// =============================================================================

/// Port for the backing object store.
///
/// One production adapter exists per backend. Implementations must be safe
/// to share between the aggregation workers of a single process.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List all bucket names.
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// Check whether a bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create a bucket.
    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// Remove an empty bucket.
    async fn remove_bucket(&self, bucket: &str) -> Result<()>;

    /// List the object names in a bucket.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>>;

    /// Get size and last-modified time of an object.
    async fn stat_object(&self, bucket: &str, object: &str) -> Result<ObjectStat>;

    /// Remove one object.
    async fn remove_object(&self, bucket: &str, object: &str) -> Result<()>;

    /// Remove several objects.
    ///
    /// # Returns
    /// * One entry per object that could not be removed; empty on full success
    async fn remove_objects(
        &self,
        bucket: &str,
        objects: &[String],
    ) -> Result<Vec<ObjectDeleteError>>;

    /// Open an object for download.
    async fn get_object(&self, bucket: &str, object: &str) -> Result<ObjectTransfer>;

    /// Upload a local file as an object.
    async fn put_object(&self, bucket: &str, object: &str, src: &Path) -> Result<()>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
