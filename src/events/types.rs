use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, Invoice, InvoiceCategory};

/// Topic names, prefixed with `kafka.topic_prefix` at publish time.
pub mod topics {
    pub const SETTLEMENTS: &str = "settlements";
    pub const BOOKING_STATUS: &str = "booking-status";
}

/// Type of domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SettlementCompleted,
    BookingStatusChanged,
}

/// Envelope wrapping all events with common metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: Option<String>,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(event_type: EventType, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            source: "booking-settlement".to_string(),
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Emitted after an invoice settlement commits. Consumers send receipts and confirmations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub invoice_id: i64,
    pub invoice_number: String,
    pub user_id: i64,
    pub category: InvoiceCategory,
    pub amount: Decimal,
    pub transaction_id: String,
    pub payment_method: String,
    pub booking_id: Option<i64>,
    pub settled_at: DateTime<Utc>,
}

impl SettlementEvent {
    pub fn from_paid_invoice(invoice: &Invoice, category: InvoiceCategory, booking_id: Option<i64>) -> Self {
        Self {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            user_id: invoice.user_id,
            category,
            amount: invoice.amount,
            transaction_id: invoice.transaction_id.clone().unwrap_or_default(),
            payment_method: invoice.payment_method.clone().unwrap_or_default(),
            booking_id,
            settled_at: invoice.paid_at.unwrap_or(invoice.updated_at),
        }
    }
}

/// Emitted after a booking status transition commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingStatusEvent {
    pub booking_id: i64,
    pub booking_number: String,
    pub user_id: i64,
    pub from: BookingStatus,
    pub to: BookingStatus,
    /// Who applied the change: `driver` or `settlement`.
    pub source: String,
    pub changed_at: DateTime<Utc>,
}

impl BookingStatusEvent {
    pub fn new(booking: &Booking, from: BookingStatus, source: &str) -> Self {
        Self {
            booking_id: booking.id,
            booking_number: booking.booking_number.clone(),
            user_id: booking.user_id,
            from,
            to: booking.status,
            source: source.to_string(),
            changed_at: booking.updated_at,
        }
    }
}

/// Any event the engine publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Settlement(EventEnvelope<SettlementEvent>),
    BookingStatus(EventEnvelope<BookingStatusEvent>),
}

impl DomainEvent {
    pub fn settlement(payload: SettlementEvent) -> Self {
        DomainEvent::Settlement(EventEnvelope::new(EventType::SettlementCompleted, payload))
    }

    pub fn booking_status(payload: BookingStatusEvent) -> Self {
        DomainEvent::BookingStatus(EventEnvelope::new(EventType::BookingStatusChanged, payload))
    }

    pub fn with_correlation_id(self, correlation_id: Option<String>) -> Self {
        match self {
            DomainEvent::Settlement(e) => DomainEvent::Settlement(e.with_correlation_id(correlation_id)),
            DomainEvent::BookingStatus(e) => {
                DomainEvent::BookingStatus(e.with_correlation_id(correlation_id))
            }
        }
    }

    /// Unprefixed topic name.
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::Settlement(_) => topics::SETTLEMENTS,
            DomainEvent::BookingStatus(_) => topics::BOOKING_STATUS,
        }
    }

    /// Partition key; events for the same invoice or booking stay ordered.
    pub fn key(&self) -> String {
        match self {
            DomainEvent::Settlement(e) => format!("invoice-{}", e.payload.invoice_id),
            DomainEvent::BookingStatus(e) => format!("booking-{}", e.payload.booking_id),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::Settlement(e) => e.event_type,
            DomainEvent::BookingStatus(e) => e.event_type,
        }
    }
}
