pub mod producer;
pub mod publisher;
pub mod types;

pub use producer::{EventProducer, ProducerConfig};
pub use publisher::{
    publish_detached, EventPublisher, KafkaEventPublisher, NoopPublisher, RecordingPublisher,
};
pub use types::{
    topics, BookingStatusEvent, DomainEvent, EventEnvelope, EventType, SettlementEvent,
};
