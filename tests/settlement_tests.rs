mod common;

use std::time::Duration;

use booking_settlement::error::AppError;
use booking_settlement::events::{DomainEvent, EventType};
use booking_settlement::gateway::{FakeOutcome, IntentStatus};
use booking_settlement::models::{
    BookingStatus, ExtensionStatus, Invoice, InvoiceCategory, InvoiceStatus, QuoteStatus,
    ServiceType, EXTENDED_EVENT,
};
use booking_settlement::repositories::InvoiceLookup;
use booking_settlement::services::{PaymentMethodChoice, SettlementOutcome};
use common::*;
use rust_decimal_macros::dec;

fn settled(outcome: SettlementOutcome) -> booking_settlement::services::SettlementReceipt {
    match outcome {
        SettlementOutcome::Settled(receipt) => receipt,
        other => panic!("expected a settled outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invoice_settles_exactly_once() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    let receipt = settled(
        engine
            .coordinator
            .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
            .await
            .unwrap(),
    );
    assert_eq!(receipt.payment_method, "Visa ending in 4242");

    let second = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;
    assert!(matches!(second, Err(AppError::NotFoundOrNotPayable)));

    let invoice = engine.store.invoice(1042).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.transaction_id.as_deref(), Some(receipt.transaction_id.as_str()));
    assert_eq!(invoice.payment_method.as_deref(), Some("Visa ending in 4242"));
    assert_eq!(engine.gateway.charges(), 1);
}

#[tokio::test]
async fn test_new_booking_invoice_materializes_one_booking() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    let receipt = settled(
        engine
            .coordinator
            .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
            .await
            .unwrap(),
    );

    let bookings = engine.store.bookings().await;
    assert_eq!(bookings.len(), 1);
    let booking = &bookings[0];
    assert_eq!(receipt.booking_id, Some(booking.id));
    assert_eq!(receipt.category, InvoiceCategory::NewBooking);
    assert_eq!(booking.status, BookingStatus::Scheduled);
    assert_eq!(booking.invoice_id, Some(1042));
    assert_eq!(booking.total, dec!(150.00));
    assert_eq!(booking.start_date, date(2026, 4, 10));
    assert!(booking.booking_number.starts_with("BK-"));

    assert_eq!(engine.store.booking_line_items(booking.id).await.len(), 2);
    assert_eq!(engine.store.quote(30).await.unwrap().status, QuoteStatus::Converted);
    assert_eq!(engine.store.invoice(1042).await.unwrap().booking_id, Some(booking.id));

    let history = engine.store.history(booking.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "scheduled");
}

#[tokio::test]
async fn test_extension_invoice_extends_end_date() {
    let engine = TestEngine::new();
    seed_extension_invoice(&engine.store).await;

    let receipt = settled(
        engine
            .coordinator
            .settle(&ctx(), pay(InvoiceLookup::Number("INV-EXT-1007".into()), dec!(75.00)))
            .await
            .unwrap(),
    );
    assert_eq!(receipt.booking_id, Some(55));
    assert_eq!(receipt.category, InvoiceCategory::Extension);

    let booking = engine.store.booking(55).await.unwrap();
    assert_eq!(booking.end_date, date(2026, 4, 2));
    assert_eq!(booking.status, BookingStatus::InUse);

    let history = engine.store.history(55).await;
    let entry = history.iter().find(|h| h.status == EXTENDED_EVENT).unwrap();
    let note = entry.note.as_deref().unwrap();
    assert!(note.contains("5 day"));
    assert!(note.contains("INV-EXT-1007"));
}

#[tokio::test]
async fn test_extension_without_approved_request_leaves_booking() {
    let engine = TestEngine::new();
    engine
        .store
        .seed_booking(booking(55, BookingStatus::InUse, ServiceType::EquipmentRental))
        .await;
    engine
        .store
        .seed_invoice(Invoice::new(1008, USER_ID, "INV-EXT-1008", dec!(30.00)).with_booking(55))
        .await;

    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1008), dec!(30.00)))
        .await
        .unwrap();

    assert_eq!(engine.store.invoice(1008).await.unwrap().status, InvoiceStatus::Paid);
    assert_eq!(engine.store.booking(55).await.unwrap().end_date, date(2026, 3, 28));
    assert!(engine.store.history(55).await.is_empty());
}

#[tokio::test]
async fn test_oversized_extension_rejected_before_charge() {
    let engine = TestEngine::new();
    engine
        .store
        .seed_booking(booking(55, BookingStatus::InUse, ServiceType::EquipmentRental))
        .await;
    engine
        .store
        .seed_invoice(Invoice::new(1007, USER_ID, "INV-EXT-1007", dec!(75.00)).with_booking(55))
        .await;
    engine
        .store
        .seed_extension(extension(401, 55, 1007, i32::MAX, ExtensionStatus::Approved))
        .await;

    let result = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1007), dec!(75.00)))
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(engine.gateway.authorization_requests().is_empty());
    assert_eq!(engine.gateway.charges(), 0);
    assert_eq!(engine.store.invoice(1007).await.unwrap().status, InvoiceStatus::Pending);
    assert_eq!(engine.store.booking(55).await.unwrap().end_date, date(2026, 3, 28));
}

#[tokio::test]
async fn test_foreign_linked_booking_or_quote_rejected_before_charge() {
    let engine = TestEngine::new();
    let mut foreign = booking(56, BookingStatus::RelocationRequested, ServiceType::EquipmentRental);
    foreign.user_id = OTHER_USER_ID;
    engine.store.seed_booking(foreign).await;
    engine
        .store
        .seed_invoice(Invoice::new(2003, USER_ID, "INV-REL-2003", dec!(95.00)).with_booking(56))
        .await;

    let mut foreign_quote = quote(31);
    foreign_quote.user_id = OTHER_USER_ID;
    engine.store.seed_quote(foreign_quote, quote_items(31)).await;
    engine
        .store
        .seed_invoice(Invoice::new(1043, USER_ID, "INV-1043", dec!(150.00)).with_quote(31))
        .await;

    for (id, amount) in [(2003, dec!(95.00)), (1043, dec!(150.00))] {
        let result = engine
            .coordinator
            .settle(&ctx(), pay(InvoiceLookup::Id(id), amount))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    assert!(engine.gateway.authorization_requests().is_empty());
    assert_eq!(engine.store.booking(56).await.unwrap().status, BookingStatus::RelocationRequested);
    assert!(engine.store.bookings().await.iter().all(|b| b.id == 56));
}

#[tokio::test]
async fn test_relocation_invoice_relocates_booking() {
    let engine = TestEngine::new();
    seed_relocation_invoice(&engine.store).await;

    let receipt = settled(
        engine
            .coordinator
            .settle(&ctx(), pay(InvoiceLookup::Id(2001), dec!(95.00)))
            .await
            .unwrap(),
    );
    assert_eq!(receipt.booking_id, Some(77));

    assert_eq!(engine.store.booking(77).await.unwrap().status, BookingStatus::Relocated);
    let history = engine.store.history(77).await;
    assert_eq!(history.last().unwrap().status, "relocated");
    assert!(history.last().unwrap().note.as_deref().unwrap().contains("INV-REL-2001"));
}

#[tokio::test]
async fn test_relocation_rejected_before_charge_when_not_requested() {
    let engine = TestEngine::new();
    engine
        .store
        .seed_booking(booking(77, BookingStatus::InUse, ServiceType::EquipmentRental))
        .await;
    engine
        .store
        .seed_invoice(Invoice::new(2001, USER_ID, "INV-REL-2001", dec!(95.00)).with_booking(77))
        .await;

    let result = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(2001), dec!(95.00)))
        .await;

    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
    assert!(engine.gateway.authorization_requests().is_empty());
    assert_eq!(engine.store.invoice(2001).await.unwrap().status, InvoiceStatus::Pending);
}

#[tokio::test]
async fn test_swap_invoice_by_stored_category() {
    let engine = TestEngine::new();
    engine
        .store
        .seed_booking(booking(78, BookingStatus::SwapRequested, ServiceType::EquipmentRental))
        .await;
    engine
        .store
        .seed_invoice(
            Invoice::new(2002, USER_ID, "INV-2002", dec!(60.00))
                .with_booking(78)
                .with_category(InvoiceCategory::Swap),
        )
        .await;

    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(2002), dec!(60.00)))
        .await
        .unwrap();

    assert_eq!(engine.store.booking(78).await.unwrap().status, BookingStatus::Swapped);
}

#[tokio::test]
async fn test_non_positive_amounts_never_reach_gateway() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    for amount in [dec!(0), dec!(-5.00), dec!(0.001)] {
        let result = engine
            .coordinator
            .settle(&ctx(), pay(InvoiceLookup::Id(1042), amount))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))), "amount {}", amount);
    }

    assert!(engine.gateway.authorization_requests().is_empty());
    assert_eq!(engine.gateway.customers_created(), 0);
}

#[tokio::test]
async fn test_amount_must_match_balance_due() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    let result = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(149.99)))
        .await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(engine.gateway.authorization_requests().is_empty());
}

#[tokio::test]
async fn test_partially_paid_invoice_settles_remaining_balance() {
    let engine = TestEngine::new();
    let mut invoice = Invoice::new(3001, USER_ID, "INV-3001", dec!(100.00));
    invoice.status = InvoiceStatus::PartiallyPaid;
    invoice.amount_paid = dec!(40.00);
    engine.store.seed_invoice(invoice).await;

    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(3001), dec!(60.00)))
        .await
        .unwrap();

    let requests = engine.gateway.authorization_requests();
    assert_eq!(requests[0].amount_minor, 6000);
    let invoice = engine.store.invoice(3001).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.amount_paid, dec!(100.00));
}

#[tokio::test]
async fn test_requires_action_leaves_invoice_unchanged() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine.gateway.push_outcome(FakeOutcome::RequireAction);

    let outcome = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await
        .unwrap();

    match outcome {
        SettlementOutcome::RequiresAction {
            payment_intent_id,
            client_secret,
        } => {
            assert_eq!(payment_intent_id, "pi_fake_1");
            assert!(client_secret.ends_with("_secret"))
        }
        other => panic!("expected requires action, got {:?}", other),
    }

    let invoice = engine.store.invoice(1042).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert!(invoice.transaction_id.is_none());
    assert!(engine.store.bookings().await.is_empty());
}

#[tokio::test]
async fn test_decline_and_outage_leave_no_trace() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine
        .gateway
        .push_outcome(FakeOutcome::Decline("insufficient_funds".into()));
    engine.gateway.push_outcome(FakeOutcome::Unavailable);
    engine.gateway.push_outcome(FakeOutcome::RateLimited);

    let declined = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;
    assert!(matches!(declined, Err(AppError::GatewayDeclined(ref r)) if r == "insufficient_funds"));

    let unavailable = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;
    assert!(matches!(unavailable, Err(AppError::GatewayUnavailable(_))));

    let limited = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;
    assert!(matches!(limited, Err(AppError::GatewayRateLimited(_))));

    let invoice = engine.store.invoice(1042).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert!(engine.store.bookings().await.is_empty());
    assert!(engine.store.discrepancies().await.is_empty());

    // The outage cleared; the retry goes through.
    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await
        .unwrap();
    assert_eq!(engine.gateway.charges(), 1);
}

#[tokio::test]
async fn test_retries_reuse_the_idempotency_key() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine.gateway.push_outcome(FakeOutcome::Unavailable);

    let _ = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;
    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await
        .unwrap();

    let requests = engine.gateway.authorization_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].idempotency_key, requests[1].idempotency_key);
    assert!(requests[0].idempotency_key.starts_with("settle_"));
}

/// Settles INV-1042 up to the step-up challenge and returns the intent id.
async fn settle_until_step_up(engine: &TestEngine) -> String {
    seed_new_booking_invoice(&engine.store).await;
    engine.gateway.push_outcome(FakeOutcome::RequireAction);

    match engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await
        .unwrap()
    {
        SettlementOutcome::RequiresAction {
            payment_intent_id, ..
        } => payment_intent_id,
        other => panic!("expected requires action, got {:?}", other),
    }
}

#[tokio::test]
async fn test_completed_step_up_settles_with_one_charge() {
    let engine = TestEngine::new();
    let intent_id = settle_until_step_up(&engine).await;
    engine
        .gateway
        .set_intent_status(&intent_id, IntentStatus::Succeeded);

    // Resubmitting the same attempt replays the original response.
    let replay = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await
        .unwrap();
    assert!(matches!(replay, SettlementOutcome::RequiresAction { .. }));

    let mut follow_up = pay(InvoiceLookup::Id(1042), dec!(150.00));
    follow_up.payment_intent_id = Some(intent_id.clone());
    let receipt = settled(engine.coordinator.settle(&ctx(), follow_up).await.unwrap());

    assert_eq!(receipt.transaction_id, intent_id);
    assert_eq!(receipt.payment_method, "Visa ending in 4242");
    assert_eq!(engine.gateway.charges(), 1);
    assert_eq!(engine.gateway.authorization_requests().len(), 2);

    let invoice = engine.store.invoice(1042).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.transaction_id.as_deref(), Some(intent_id.as_str()));
    assert_eq!(engine.store.bookings().await.len(), 1);
    assert!(engine.store.discrepancies().await.is_empty());
}

#[tokio::test]
async fn test_follow_up_before_step_up_completes() {
    let engine = TestEngine::new();
    let intent_id = settle_until_step_up(&engine).await;

    let mut follow_up = pay(InvoiceLookup::Id(1042), dec!(150.00));
    follow_up.payment_intent_id = Some(intent_id.clone());
    let outcome = engine.coordinator.settle(&ctx(), follow_up).await.unwrap();

    assert_eq!(
        outcome,
        SettlementOutcome::RequiresAction {
            payment_intent_id: intent_id.clone(),
            client_secret: format!("{}_secret", intent_id),
        }
    );
    assert_eq!(engine.store.invoice(1042).await.unwrap().status, InvoiceStatus::Pending);
    assert_eq!(engine.gateway.authorization_requests().len(), 1);
}

#[tokio::test]
async fn test_follow_up_rejects_intent_of_another_invoice() {
    let engine = TestEngine::new();
    let intent_id = settle_until_step_up(&engine).await;
    engine
        .gateway
        .set_intent_status(&intent_id, IntentStatus::Succeeded);
    seed_extension_invoice(&engine.store).await;

    let mut follow_up = pay(InvoiceLookup::Id(1007), dec!(75.00));
    follow_up.payment_intent_id = Some(intent_id);
    let result = engine.coordinator.settle(&ctx(), follow_up).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(engine.store.invoice(1007).await.unwrap().status, InvoiceStatus::Pending);
    assert_eq!(engine.store.invoice(1042).await.unwrap().status, InvoiceStatus::Pending);
}

#[tokio::test]
async fn test_new_attempt_after_abandoned_step_up() {
    let engine = TestEngine::new();
    settle_until_step_up(&engine).await;

    let mut retry = pay(InvoiceLookup::Id(1042), dec!(150.00));
    retry.attempt = Some(2);
    let receipt = settled(engine.coordinator.settle(&ctx(), retry).await.unwrap());
    assert_eq!(receipt.transaction_id, "pi_fake_2");

    let requests = engine.gateway.authorization_requests();
    assert_ne!(requests[0].idempotency_key, requests[1].idempotency_key);
    assert_eq!(engine.gateway.charges(), 1);
}

#[tokio::test]
async fn test_foreign_and_missing_invoices_look_the_same() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    let foreign = engine
        .coordinator
        .settle(&other_ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;
    let missing = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(9999), dec!(150.00)))
        .await;

    assert!(matches!(foreign, Err(AppError::NotFoundOrNotPayable)));
    assert!(matches!(missing, Err(AppError::NotFoundOrNotPayable)));
    assert!(engine.gateway.authorization_requests().is_empty());
}

#[tokio::test]
async fn test_lookup_by_quote() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    let receipt = settled(
        engine
            .coordinator
            .settle(&ctx(), pay(InvoiceLookup::Quote(30), dec!(150.00)))
            .await
            .unwrap(),
    );
    assert_eq!(receipt.invoice_id, 1042);
}

#[tokio::test]
async fn test_fresh_method_saved_when_requested() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    let mut request = pay(InvoiceLookup::Id(1042), dec!(150.00));
    request.save_payment_method = true;
    engine.coordinator.settle(&ctx(), request).await.unwrap();

    let methods = engine.store.payment_methods(USER_ID).await;
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].gateway_method_id, VISA);
    assert_eq!(methods[0].label(), "Visa ending in 4242");

    let attached = engine.gateway.attached_methods();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].0, VISA);

    let requests = engine.gateway.authorization_requests();
    assert!(requests[0].save_for_future);
    assert!(!requests[0].off_session);
}

#[tokio::test]
async fn test_attach_failure_does_not_fail_settlement() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine.gateway.fail_attach(true);

    let mut request = pay(InvoiceLookup::Id(1042), dec!(150.00));
    request.save_payment_method = true;
    engine.coordinator.settle(&ctx(), request).await.unwrap();

    assert_eq!(engine.store.invoice(1042).await.unwrap().status, InvoiceStatus::Paid);
    assert!(engine.store.payment_methods(USER_ID).await.is_empty());
}

#[tokio::test]
async fn test_saved_method_charged_off_session() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine
        .store
        .seed_payment_method(saved_method(12, USER_ID, "pm_saved_mc"))
        .await;
    engine.gateway.register_method("pm_saved_mc", "mastercard", "4444");

    let mut request = pay(InvoiceLookup::Id(1042), dec!(150.00));
    request.payment_method = PaymentMethodChoice::Saved(12);
    let receipt = settled(engine.coordinator.settle(&ctx(), request).await.unwrap());
    assert_eq!(receipt.payment_method, "Mastercard ending in 4444");

    let requests = engine.gateway.authorization_requests();
    assert_eq!(requests[0].payment_method, "pm_saved_mc");
    assert!(requests[0].off_session);
    assert!(!requests[0].save_for_future);
}

#[tokio::test]
async fn test_foreign_saved_method_rejected() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine
        .store
        .seed_payment_method(saved_method(12, OTHER_USER_ID, "pm_saved_mc"))
        .await;

    let mut request = pay(InvoiceLookup::Id(1042), dec!(150.00));
    request.payment_method = PaymentMethodChoice::Saved(12);
    let result = engine.coordinator.settle(&ctx(), request).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(engine.gateway.authorization_requests().is_empty());
}

#[tokio::test]
async fn test_gateway_customer_created_once() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine
        .store
        .seed_invoice(Invoice::new(3002, USER_ID, "INV-3002", dec!(20.00)))
        .await;

    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await
        .unwrap();
    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(3002), dec!(20.00)))
        .await
        .unwrap();

    assert_eq!(engine.gateway.customers_created(), 1);
    let profile = engine.store.billing_profile(USER_ID).await.unwrap();
    assert_eq!(profile.external_customer_id, "cus_fake_1");
    let requests = engine.gateway.authorization_requests();
    assert!(requests.iter().all(|r| r.customer_id == "cus_fake_1"));
}

#[tokio::test]
async fn test_customer_creation_failure_stops_before_charge() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine.gateway.fail_customer_creation(true);

    let result = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;

    assert!(matches!(result, Err(AppError::GatewayUnavailable(_))));
    assert!(engine.gateway.authorization_requests().is_empty());
    assert!(engine.store.billing_profile(USER_ID).await.is_none());
}

#[tokio::test]
async fn test_commit_failure_records_discrepancy() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine.store.fail_on("insert_booking");

    let result = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;

    let transaction_id = match result {
        Err(AppError::InternalInconsistency {
            invoice_id,
            transaction_id,
            ..
        }) => {
            assert_eq!(invoice_id, 1042);
            transaction_id
        }
        other => panic!("expected internal inconsistency, got {:?}", other),
    };

    // The charge happened, the local state rolled back as a whole.
    assert_eq!(engine.gateway.charges(), 1);
    let invoice = engine.store.invoice(1042).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert!(engine.store.bookings().await.is_empty());

    let discrepancies = engine.store.discrepancies().await;
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0].transaction_id, transaction_id);
    assert_eq!(discrepancies[0].amount, dec!(150.00));
    assert_eq!(discrepancies[0].payment_method_label, "Visa ending in 4242");
}

#[tokio::test]
async fn test_concurrent_settlements_charge_once() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;

    let (ctx_a, ctx_b) = (ctx(), ctx());
    let (a, b) = tokio::join!(
        engine
            .coordinator
            .settle(&ctx_a, pay(InvoiceLookup::Id(1042), dec!(150.00))),
        engine
            .coordinator
            .settle(&ctx_b, pay(InvoiceLookup::Id(1042), dec!(150.00))),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!([&a, &b]
        .iter()
        .any(|r| matches!(r, Err(AppError::NotFoundOrNotPayable))));
    assert_eq!(engine.gateway.charges(), 1);
    assert_eq!(engine.store.bookings().await.len(), 1);
    assert!(engine.store.discrepancies().await.is_empty());
}

#[tokio::test]
async fn test_settlement_event_published_after_commit() {
    let engine = TestEngine::new();
    seed_relocation_invoice(&engine.store).await;

    engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(2001), dec!(95.00)))
        .await
        .unwrap();

    let events = engine.publisher.wait_for(2, Duration::from_secs(1)).await;
    assert_eq!(events.len(), 2);

    let settlement = events
        .iter()
        .find_map(|e| match e {
            DomainEvent::Settlement(envelope) => Some(envelope),
            _ => None,
        })
        .unwrap();
    assert_eq!(settlement.event_type, EventType::SettlementCompleted);
    assert_eq!(settlement.correlation_id.as_deref(), Some("req-test-1"));
    assert_eq!(settlement.payload.invoice_number, "INV-REL-2001");
    assert_eq!(settlement.payload.booking_id, Some(77));

    let transition = events
        .iter()
        .find_map(|e| match e {
            DomainEvent::BookingStatus(envelope) => Some(envelope),
            _ => None,
        })
        .unwrap();
    assert_eq!(transition.payload.from, BookingStatus::RelocationRequested);
    assert_eq!(transition.payload.to, BookingStatus::Relocated);
    assert_eq!(transition.payload.source, "settlement");
}

#[tokio::test]
async fn test_no_event_without_settlement() {
    let engine = TestEngine::new();
    seed_new_booking_invoice(&engine.store).await;
    engine
        .gateway
        .push_outcome(FakeOutcome::Decline("card_declined".into()));

    let _ = engine
        .coordinator
        .settle(&ctx(), pay(InvoiceLookup::Id(1042), dec!(150.00)))
        .await;

    let events = engine.publisher.wait_for(1, Duration::from_millis(50)).await;
    assert!(events.is_empty());
}
