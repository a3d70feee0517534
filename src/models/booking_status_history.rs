use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::BookingStatus;

/// History label written when a rental period is extended. Not a booking status.
pub const EXTENDED_EVENT: &str = "extended";

/// One append-only audit row of a booking's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BookingStatusHistory {
    pub id: i64,
    pub booking_id: i64,
    /// Booking status name or an event label such as [`EXTENDED_EVENT`].
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Values for appending a history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStatusHistory {
    pub booking_id: i64,
    pub status: String,
    pub note: Option<String>,
}

impl NewStatusHistory {
    pub fn for_status(booking_id: i64, status: BookingStatus, note: Option<String>) -> Self {
        Self {
            booking_id,
            status: status.as_str().to_string(),
            note,
        }
    }

    pub fn extended(booking_id: i64, days: i32, invoice_number: &str) -> Self {
        Self {
            booking_id,
            status: EXTENDED_EVENT.to_string(),
            note: Some(format!(
                "Rental extended by {} day(s) via invoice {}",
                days, invoice_number
            )),
        }
    }
}

/// Returns the display "current status": the latest row by timestamp, then insertion order.
pub fn current_status(history: &[BookingStatusHistory]) -> Option<&BookingStatusHistory> {
    history
        .iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, status: &str, created_at: DateTime<Utc>) -> BookingStatusHistory {
        BookingStatusHistory {
            id,
            booking_id: 1,
            status: status.to_string(),
            note: None,
            created_at,
        }
    }

    #[test]
    fn test_current_status_uses_insertion_order_on_ties() {
        let now = Utc::now();
        let history = vec![
            row(1, "scheduled", now - chrono::Duration::minutes(5)),
            row(2, "assigned", now),
            row(3, "out_for_delivery", now),
        ];
        assert_eq!(current_status(&history).unwrap().status, "out_for_delivery");
    }

    #[test]
    fn test_extended_note_cites_days_and_invoice() {
        let entry = NewStatusHistory::extended(55, 5, "INV-EXT-1007");
        assert_eq!(entry.status, EXTENDED_EVENT);
        let note = entry.note.unwrap();
        assert!(note.contains("5 day"));
        assert!(note.contains("INV-EXT-1007"));
    }
}
