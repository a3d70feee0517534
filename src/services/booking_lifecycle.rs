use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::events::{publish_detached, BookingStatusEvent, DomainEvent, EventPublisher};
use crate::models::{
    hash_driver_token, Booking, BookingStatus, BookingStatusHistory, NewStatusHistory, ServiceType,
};
use crate::observability::get_metrics;
use crate::repositories::{SettlementStore, UnitOfWork};

/// Legal booking status transitions.
#[derive(Debug, Clone)]
pub struct BookingStateMachine;

impl BookingStateMachine {
    /// Returns valid next states from the current state. Only equipment rentals pass through
    /// `in_use`; every other service completes straight after delivery.
    pub fn valid_transitions(current: BookingStatus, service_type: ServiceType) -> Vec<BookingStatus> {
        match current {
            BookingStatus::Pending | BookingStatus::Scheduled => vec![BookingStatus::Assigned],
            BookingStatus::Assigned => vec![BookingStatus::OutForDelivery],
            BookingStatus::OutForDelivery => vec![BookingStatus::Delivered],
            BookingStatus::Delivered => match service_type {
                ServiceType::EquipmentRental => vec![BookingStatus::InUse],
                ServiceType::JunkRemoval | ServiceType::Other => vec![BookingStatus::Completed],
            },
            BookingStatus::InUse => vec![BookingStatus::AwaitingPickup],
            BookingStatus::AwaitingPickup => vec![BookingStatus::Pickedup],
            BookingStatus::Pickedup => vec![BookingStatus::Completed],
            BookingStatus::RelocationRequested => vec![BookingStatus::Relocated],
            BookingStatus::SwapRequested => vec![BookingStatus::Swapped],
            BookingStatus::Relocated | BookingStatus::Swapped => vec![],
            BookingStatus::Completed | BookingStatus::Cancelled => vec![], // Terminal state
        }
    }

    /// The single legal next status, if any.
    pub fn next_status(current: BookingStatus, service_type: ServiceType) -> Option<BookingStatus> {
        Self::valid_transitions(current, service_type).into_iter().next()
    }

    /// Checks if a transition is valid.
    pub fn can_transition(from: BookingStatus, to: BookingStatus, service_type: ServiceType) -> bool {
        Self::valid_transitions(from, service_type).contains(&to)
    }

    /// Attempts to transition to a new state.
    pub fn transition(
        from: BookingStatus,
        to: BookingStatus,
        service_type: ServiceType,
    ) -> Result<BookingStatus> {
        if Self::can_transition(from, to, service_type) {
            Ok(to)
        } else {
            Err(AppError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// Booking status changes outside settlement: the driver entry point and history reads.
pub struct BookingLifecycleService {
    store: Arc<dyn SettlementStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl BookingLifecycleService {
    pub fn new(store: Arc<dyn SettlementStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Validates and applies a transition inside the caller's unit of work, appending the
    /// history row alongside the status update.
    pub async fn apply_transition(
        uow: &mut dyn UnitOfWork,
        booking: &Booking,
        to: BookingStatus,
        note: Option<String>,
        source: &str,
    ) -> Result<Booking> {
        BookingStateMachine::transition(booking.status, to, booking.service_type)?;

        let updated = uow.update_booking_status(booking.id, to).await?;
        uow.append_status_history(&NewStatusHistory::for_status(booking.id, to, note))
            .await?;

        get_metrics().record_booking_transition(booking.status.as_str(), to.as_str(), source);
        info!(
            "Booking {} moved from {} to {} ({})",
            booking.booking_number, booking.status, to, source
        );
        Ok(updated)
    }

    /// Applies a driver-requested status change.
    ///
    /// The raw token is hashed and must match an unexpired, unrevoked driver token; the booking
    /// must be assigned to that driver; only the single legal next status is accepted.
    pub async fn update_status_as_driver(
        &self,
        token: &str,
        booking_id: i64,
        new_status: &str,
    ) -> Result<Booking> {
        let target: BookingStatus = new_status
            .parse()
            .map_err(AppError::Validation)?;

        let mut uow = self.store.begin().await?;

        let driver_token = uow
            .find_driver_token(&hash_driver_token(token))
            .await?
            .filter(|t| t.is_valid_at(Utc::now()))
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired driver token".to_string()))?;

        let booking = uow
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking '{}' not found", booking_id)))?;

        if booking.driver_id != Some(driver_token.driver_id) {
            warn!(
                "Driver {} attempted to update booking {} assigned to {:?}",
                driver_token.driver_id, booking.id, booking.driver_id
            );
            return Err(AppError::Forbidden(
                "Booking is not assigned to this driver".to_string(),
            ));
        }

        if BookingStateMachine::next_status(booking.status, booking.service_type) != Some(target) {
            return Err(AppError::InvalidTransition {
                from: booking.status.to_string(),
                to: target.to_string(),
            });
        }

        let note = Some(format!("Updated by driver {}", driver_token.driver_id));
        let updated = Self::apply_transition(uow.as_mut(), &booking, target, note, "driver").await?;
        uow.commit().await?;

        publish_detached(
            self.publisher.clone(),
            DomainEvent::booking_status(BookingStatusEvent::new(&updated, booking.status, "driver")),
        );

        Ok(updated)
    }

    /// Status history of a booking owned by `user_id`, oldest first.
    pub async fn status_history(
        &self,
        user_id: i64,
        booking_id: i64,
    ) -> Result<Vec<BookingStatusHistory>> {
        let mut uow = self.store.begin().await?;

        let booking = uow
            .find_booking(booking_id)
            .await?
            .filter(|b| b.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Booking '{}' not found", booking_id)))?;

        let history = uow.list_status_history(booking.id).await?;
        uow.rollback().await?;

        Ok(history)
    }
}
