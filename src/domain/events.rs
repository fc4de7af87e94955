//! Domain Events
//!
//! Immutable records of reclamation activity. Published through the
//! [`EventPublisher`](super::ports::EventPublisher) port for audit trails.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::bucket_expired("job-1234", 4096, 45);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ports::ReclaimPass;

/// Domain event representing a significant occurrence during quota enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A bucket older than the maximum age was deleted.
    BucketExpired {
        bucket: String,
        size_bytes: u64,
        age_days: i64,
        dry_run: bool,
        timestamp: DateTime<Utc>,
    },

    /// A bucket was deleted to bring usage under quota.
    BucketEvicted {
        bucket: String,
        size_bytes: u64,
        remaining_bytes: u64,
        dry_run: bool,
        timestamp: DateTime<Utc>,
    },

    /// Deleting a bucket failed.
    BucketDeleteFailed {
        bucket: String,
        pass: ReclaimPass,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A cleanup run finished.
    CleanupCompleted {
        run_id: Uuid,
        final_size: u64,
        max_size: u64,
        deleted_count: usize,
        failed_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the event timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::BucketExpired { timestamp, .. }
            | DomainEvent::BucketEvicted { timestamp, .. }
            | DomainEvent::BucketDeleteFailed { timestamp, .. }
            | DomainEvent::CleanupCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::BucketExpired { .. } => "BucketExpired",
            DomainEvent::BucketEvicted { .. } => "BucketEvicted",
            DomainEvent::BucketDeleteFailed { .. } => "BucketDeleteFailed",
            DomainEvent::CleanupCompleted { .. } => "CleanupCompleted",
        }
    }

    /// Get the bucket the event is about, if any.
    pub fn bucket(&self) -> Option<&str> {
        match self {
            DomainEvent::BucketExpired { bucket, .. }
            | DomainEvent::BucketEvicted { bucket, .. }
            | DomainEvent::BucketDeleteFailed { bucket, .. } => Some(bucket),
            DomainEvent::CleanupCompleted { .. } => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    pub fn bucket_expired(bucket: impl Into<String>, size_bytes: u64, age_days: i64) -> Self {
        DomainEvent::BucketExpired {
            bucket: bucket.into(),
            size_bytes,
            age_days,
            dry_run: false,
            timestamp: Utc::now(),
        }
    }

    pub fn bucket_evicted(
        bucket: impl Into<String>,
        size_bytes: u64,
        remaining_bytes: u64,
    ) -> Self {
        DomainEvent::BucketEvicted {
            bucket: bucket.into(),
            size_bytes,
            remaining_bytes,
            dry_run: false,
            timestamp: Utc::now(),
        }
    }

    pub fn bucket_delete_failed(
        bucket: impl Into<String>,
        pass: ReclaimPass,
        reason: impl Into<String>,
    ) -> Self {
        DomainEvent::BucketDeleteFailed {
            bucket: bucket.into(),
            pass,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn cleanup_completed(
        run_id: Uuid,
        final_size: u64,
        max_size: u64,
        deleted_count: usize,
        failed_count: usize,
    ) -> Self {
        DomainEvent::CleanupCompleted {
            run_id,
            final_size,
            max_size,
            deleted_count,
            failed_count,
            timestamp: Utc::now(),
        }
    }

    /// Mark a deletion event as simulated.
    pub fn simulated(mut self) -> Self {
        match &mut self {
            DomainEvent::BucketExpired { dry_run, .. }
            | DomainEvent::BucketEvicted { dry_run, .. } => *dry_run = true,
            _ => {}
        }
        self
    }
}
