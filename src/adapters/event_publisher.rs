//! Event Publisher Adapters
//!
//! Implements the `EventPublisher` port for audit logging and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Publishes domain events to the tracing subscriber.
///
/// This is the default audit trail of a [`QuotaManager`](crate::quota::QuotaManager).
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let bucket = event.bucket().unwrap_or("-").to_string();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        info!(event_type = %event_type, bucket = %bucket, event = %json, "Quota event");

        Ok(())
    }
}

/// Collects events in memory for inspection in tests.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events of a given type, in publication order.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Buckets named by events of a given type, in publication order.
    pub fn buckets_of_type(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .filter_map(|e| e.bucket().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}
