//! Quota Module
//!
//! Storage accounting and retention for a bucketed object store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             QuotaManager                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────────────┐         ┌──────────────────────────────────┐  │
//! │  │ BucketStatsAggregator│ ──────▶ │ RetentionPolicyEngine            │  │
//! │  │ (bounded task pool)  │ infos   │ (age pass, then size pass)       │  │
//! │  └──────────────────────┘         └──────────────────────────────────┘  │
//! │             │                                    │                       │
//! │             └─────────────── ObjectStore ────────┘                       │
//! │                                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Aggregator** (`aggregator.rs`): measures size and earliest
//!   last-modified time of each bucket. Failures are collected per bucket.
//!
//! - **Retention** (`retention.rs`): deletes buckets older than the maximum
//!   age, then the oldest remaining buckets until usage fits the quota.
//!
//! - **Manager** (`manager.rs`): the facade used by the CLI and scheduled
//!   jobs, plus thin object and bucket pass-throughs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bucketquota::quota::{QuotaConfig, QuotaManager};
//!
//! let manager = QuotaManager::new(store, QuotaConfig::default())?;
//! let report = manager.cleanup_storage(70, Some(30)).await?;
//! println!("{} bytes left, deleted {:?}", report.final_size, report.deleted_buckets);
//! ```

pub mod aggregator;
pub mod manager;
pub mod retention;

#[cfg(test)]
mod proptest;

pub use aggregator::{AggregatorConfig, BucketStats, BucketStatsAggregator, BucketStatsError};
pub use manager::{
    CleanupReport, ObjectDeleteOutcome, QuotaConfig, QuotaManager, StatsFailurePolicy,
};
pub use retention::{
    delete_bucket, BucketDeleteFailure, RetentionConfig, RetentionDecision, RetentionOutcome,
    RetentionPolicyEngine,
};
