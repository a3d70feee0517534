use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Operational status of a booking. Legal moves between statuses are defined by
/// [`crate::services::BookingStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Scheduled,
    Assigned,
    OutForDelivery,
    Delivered,
    InUse,
    AwaitingPickup,
    Pickedup,
    Completed,
    Cancelled,
    RelocationRequested,
    Relocated,
    SwapRequested,
    Swapped,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 14] = [
        BookingStatus::Pending,
        BookingStatus::Scheduled,
        BookingStatus::Assigned,
        BookingStatus::OutForDelivery,
        BookingStatus::Delivered,
        BookingStatus::InUse,
        BookingStatus::AwaitingPickup,
        BookingStatus::Pickedup,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::RelocationRequested,
        BookingStatus::Relocated,
        BookingStatus::SwapRequested,
        BookingStatus::Swapped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Assigned => "assigned",
            BookingStatus::OutForDelivery => "out_for_delivery",
            BookingStatus::Delivered => "delivered",
            BookingStatus::InUse => "in_use",
            BookingStatus::AwaitingPickup => "awaiting_pickup",
            BookingStatus::Pickedup => "pickedup",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::RelocationRequested => "relocation_requested",
            BookingStatus::Relocated => "relocated",
            BookingStatus::SwapRequested => "swap_requested",
            BookingStatus::Swapped => "swapped",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        BookingStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == needle)
            .ok_or_else(|| format!("unknown booking status '{}'", s))
    }
}

/// Kind of service a booking delivers. Only equipment rentals pass through `in_use`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "service_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    EquipmentRental,
    JunkRemoval,
    Other,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::EquipmentRental => "equipment_rental",
            ServiceType::JunkRemoval => "junk_removal",
            ServiceType::Other => "other",
        }
    }
}

/// A concrete booking created from an accepted quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: i64,
    pub booking_number: String,
    pub user_id: i64,
    pub quote_id: Option<i64>,
    /// Invoice the booking was materialized from. Unique across bookings.
    pub invoice_id: Option<i64>,
    pub service_type: ServiceType,
    pub status: BookingStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub driver_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Returns the end date pushed out by `days`, or `None` if `days` is negative or the
    /// result falls outside the calendar.
    pub fn extended_end_date(&self, days: i32) -> Option<NaiveDate> {
        let days = u64::try_from(days).ok()?;
        self.end_date.checked_add_days(Days::new(days))
    }
}

/// Values for inserting a booking; the store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    pub booking_number: String,
    pub user_id: i64,
    pub quote_id: Option<i64>,
    pub invoice_id: Option<i64>,
    pub service_type: ServiceType,
    pub status: BookingStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl NewBooking {
    pub fn into_booking(self, id: i64) -> Booking {
        let now = Utc::now();
        Booking {
            id,
            booking_number: self.booking_number,
            user_id: self.user_id,
            quote_id: self.quote_id,
            invoice_id: self.invoice_id,
            service_type: self.service_type,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            subtotal: self.subtotal,
            discount: self.discount,
            tax: self.tax,
            total: self.total,
            driver_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Category of a quote or booking line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "line_item_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Equipment,
    JunkRemoval,
}

/// Equipment or junk-removal item attached to a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BookingLineItem {
    pub id: i64,
    pub booking_id: i64,
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
        assert_eq!("  In_Use ".parse::<BookingStatus>(), Ok(BookingStatus::InUse));
        assert!("teleported".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(!BookingStatus::Delivered.is_terminal());
    }

    #[test]
    fn test_extended_end_date() {
        let booking = NewBooking {
            booking_number: "BK-1".into(),
            user_id: 1,
            quote_id: None,
            invoice_id: None,
            service_type: ServiceType::EquipmentRental,
            status: BookingStatus::InUse,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 28).unwrap(),
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
        }
        .into_booking(55);

        assert_eq!(
            booking.extended_end_date(5),
            NaiveDate::from_ymd_opt(2026, 4, 2)
        );
        assert_eq!(booking.extended_end_date(i32::MAX), None);
        assert_eq!(booking.extended_end_date(-1), None);
    }
}
