use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::producer::EventProducer;
use super::types::DomainEvent;
use crate::config::KafkaSettings;
use crate::error::Result;
use crate::observability::get_metrics;

/// Outbound notification port. Publishing happens after commit and never affects the outcome
/// of the operation that produced the event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}

/// Publishes on a background task; failures are logged and counted only.
pub fn publish_detached(publisher: Arc<dyn EventPublisher>, event: DomainEvent) {
    tokio::spawn(async move {
        let topic = event.topic();
        let key = event.key();
        if let Err(e) = publisher.publish(event).await {
            warn!("Failed to publish {} event {}: {}", topic, key, e);
        }
    });
}

/// Publishes events to Kafka under `kafka.topic_prefix`.
pub struct KafkaEventPublisher {
    producer: EventProducer,
    settings: KafkaSettings,
}

impl KafkaEventPublisher {
    pub fn new(producer: EventProducer, settings: KafkaSettings) -> Self {
        Self { producer, settings }
    }

    pub fn producer(&self) -> &EventProducer {
        &self.producer
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let topic = self.settings.topic(event.topic());
        let key = event.key();
        let result = self.producer.send(&topic, Some(&key), &event).await;
        get_metrics().record_kafka_message(&topic, result.is_ok());
        result.map(|_| ())
    }
}

/// Used when Kafka is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        debug!("Event publishing disabled, dropping {} event {}", event.topic(), event.key());
        Ok(())
    }
}

/// Keeps published events in memory so tests can assert on them.
#[derive(Debug, Default, Clone)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Waits until at least `count` events arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<DomainEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
