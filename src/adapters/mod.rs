//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │              ObjectStore │ EventPublisher (ports)                │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  FilesystemObjectStore │ InMemoryObjectStore                     │
//! │  LoggingEventPublisher │ InMemoryEventCollector                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use bucketquota::adapters::FilesystemObjectStore;
//! use bucketquota::domain::ports::ObjectStore;
//!
//! let store = FilesystemObjectStore::open("/srv/objects").await?;
//! let buckets = store.list_buckets().await?;
//! ```

mod event_publisher;
mod filesystem;
mod memory;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use filesystem::FilesystemObjectStore;
pub use memory::InMemoryObjectStore;
