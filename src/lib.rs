//! BucketQuota - Storage Quota Enforcement for Bucketed Object Stores
//!
//! Measures the size and age of every bucket in an object store and
//! reclaims space by deleting whole buckets: first those older than a
//! maximum age, then the oldest remaining buckets until usage fits a quota.
//!
//! # Architecture
//!
//! ```text
//! Aggregator (measure) → Retention Engine (decide + delete) → Report
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Object store and event publisher implementations
//! - [`domain`] - Ports and domain events
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus metrics
//! - [`quota`] - Aggregation, retention and the quota manager facade

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod quota;

// Re-export commonly used types
pub use domain::ports::{BucketInfo, ObjectStore};
pub use error::{Error, Result};
pub use quota::{CleanupReport, QuotaConfig, QuotaManager, StatsFailurePolicy};
