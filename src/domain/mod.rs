//! Domain Layer
//!
//! Ports and events the quota engine is written against.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for the object store and event sinks
//! - **Events** (`events.rs`) - Domain events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use bucketquota::domain::ports::ObjectStore;
//!
//! async fn total_objects<S: ObjectStore + ?Sized>(store: &S) -> Result<usize> {
//!     let mut count = 0;
//!     for bucket in store.list_buckets().await? {
//!         count += store.list_objects(&bucket).await?.len();
//!     }
//!     Ok(count)
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::DomainEvent;
pub use ports::{
    BucketInfo, EventPublisher, ObjectDeleteError, ObjectStat, ObjectStore, ObjectTransfer,
    ReclaimPass,
};
