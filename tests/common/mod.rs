#![allow(dead_code)]

use std::sync::Arc;

use booking_settlement::context::{RequestContext, UserIdentity};
use booking_settlement::gateway::FakeGateway;
use booking_settlement::events::RecordingPublisher;
use booking_settlement::models::{
    hash_driver_token, Booking, BookingStatus, BookingStatusHistory, DriverAccessToken,
    ExtensionRequest, ExtensionStatus, Invoice, LineItemKind, PaymentMethodReference, Quote,
    QuoteLineItem, QuoteStatus, ServiceType,
};
use booking_settlement::repositories::{InMemoryStore, InvoiceLookup};
use booking_settlement::services::{
    BookingLifecycleService, PaymentMethodChoice, ReconciliationService, SettlementCoordinator,
    SettlementRequest,
};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const USER_ID: i64 = 7;
pub const OTHER_USER_ID: i64 = 8;
pub const DRIVER_ID: i64 = 21;
pub const DRIVER_TOKEN: &str = "drv-token-21";
pub const VISA: &str = "pm_card_visa";

/// Engine wired to the in-memory store, the scripted gateway and a recording publisher.
pub struct TestEngine {
    pub store: InMemoryStore,
    pub gateway: FakeGateway,
    pub publisher: RecordingPublisher,
    pub coordinator: Arc<SettlementCoordinator>,
    pub lifecycle: Arc<BookingLifecycleService>,
    pub reconciliation: ReconciliationService,
}

impl TestEngine {
    pub fn new() -> Self {
        let store = InMemoryStore::new();
        let gateway = FakeGateway::new();
        gateway.register_method(VISA, "visa", "4242");
        let publisher = RecordingPublisher::new();

        let coordinator = Arc::new(SettlementCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            Arc::new(publisher.clone()),
            "usd",
        ));
        let lifecycle = Arc::new(BookingLifecycleService::new(
            Arc::new(store.clone()),
            Arc::new(publisher.clone()),
        ));
        let reconciliation = ReconciliationService::new(coordinator.clone());

        Self {
            store,
            gateway,
            publisher,
            coordinator,
            lifecycle,
            reconciliation,
        }
    }
}

pub fn user() -> UserIdentity {
    UserIdentity {
        id: USER_ID,
        email: "dana@example.com".to_string(),
        name: "Dana Reyes".to_string(),
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new(user()).with_request_id("req-test-1")
}

pub fn other_ctx() -> RequestContext {
    RequestContext::new(UserIdentity {
        id: OTHER_USER_ID,
        email: "sam@example.com".to_string(),
        name: "Sam Ortiz".to_string(),
    })
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Settlement with a freshly entered Visa card.
pub fn pay(lookup: InvoiceLookup, amount: Decimal) -> SettlementRequest {
    SettlementRequest {
        lookup,
        amount,
        payment_method: PaymentMethodChoice::Fresh(VISA.to_string()),
        save_payment_method: false,
        attempt: None,
        payment_intent_id: None,
    }
}

pub fn booking(id: i64, status: BookingStatus, service_type: ServiceType) -> Booking {
    let now = Utc::now();
    Booking {
        id,
        booking_number: format!("BK-20260301-{:06X}", id),
        user_id: USER_ID,
        quote_id: None,
        invoice_id: None,
        service_type,
        status,
        start_date: date(2026, 3, 1),
        end_date: date(2026, 3, 28),
        subtotal: dec!(400.00),
        discount: Decimal::ZERO,
        tax: dec!(32.00),
        total: dec!(432.00),
        driver_id: Some(DRIVER_ID),
        created_at: now,
        updated_at: now,
    }
}

pub fn history(id: i64, booking_id: i64, status: BookingStatus, minutes_ago: i64) -> BookingStatusHistory {
    BookingStatusHistory {
        id,
        booking_id,
        status: status.to_string(),
        note: None,
        created_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

/// Quote 30: $140.00 less $5.00 discount plus $15.00 tax, $150.00 total.
pub fn quote(id: i64) -> Quote {
    Quote {
        id,
        user_id: USER_ID,
        service_type: ServiceType::EquipmentRental,
        status: QuoteStatus::Accepted,
        quoted_price: dec!(140.00),
        discount: dec!(5.00),
        tax: dec!(15.00),
        start_date: date(2026, 4, 10),
        end_date: date(2026, 4, 17),
        created_at: Utc::now(),
    }
}

pub fn quote_items(quote_id: i64) -> Vec<QuoteLineItem> {
    vec![
        QuoteLineItem {
            id: 301,
            quote_id,
            kind: LineItemKind::Equipment,
            description: "20 yard dumpster".to_string(),
            quantity: 1,
            unit_price: dec!(120.00),
        },
        QuoteLineItem {
            id: 302,
            quote_id,
            kind: LineItemKind::JunkRemoval,
            description: "Mattress haul-away".to_string(),
            quantity: 2,
            unit_price: dec!(10.00),
        },
    ]
}

pub fn extension(id: i64, booking_id: i64, invoice_id: i64, days: i32, status: ExtensionStatus) -> ExtensionRequest {
    ExtensionRequest {
        id,
        booking_id,
        invoice_id: Some(invoice_id),
        requested_days: days,
        status,
        created_at: Utc::now(),
    }
}

pub fn saved_method(id: i64, user_id: i64, gateway_method_id: &str) -> PaymentMethodReference {
    PaymentMethodReference {
        id,
        user_id,
        gateway_method_id: gateway_method_id.to_string(),
        brand: Some("mastercard".to_string()),
        last4: Some("4444".to_string()),
        is_default: true,
        created_at: Utc::now(),
    }
}

pub fn driver_token(id: i64, driver_id: i64, raw: &str) -> DriverAccessToken {
    DriverAccessToken {
        id,
        driver_id,
        token_hash: hash_driver_token(raw),
        expires_at: Utc::now() + Duration::hours(8),
        revoked: false,
    }
}

/// Seeds `INV-1042` ($150.00) for quote 30 with its line items.
pub async fn seed_new_booking_invoice(store: &InMemoryStore) -> Invoice {
    store.seed_quote(quote(30), quote_items(30)).await;
    let invoice = Invoice::new(1042, USER_ID, "INV-1042", dec!(150.00)).with_quote(30);
    store.seed_invoice(invoice.clone()).await;
    invoice
}

/// Seeds booking 55 (in use, ends 2026-03-28) and `INV-EXT-1007` ($75.00) with an approved
/// five-day extension.
pub async fn seed_extension_invoice(store: &InMemoryStore) -> Invoice {
    store
        .seed_booking(booking(55, BookingStatus::InUse, ServiceType::EquipmentRental))
        .await;
    let invoice = Invoice::new(1007, USER_ID, "INV-EXT-1007", dec!(75.00)).with_booking(55);
    store.seed_invoice(invoice.clone()).await;
    store
        .seed_extension(extension(401, 55, 1007, 5, ExtensionStatus::Approved))
        .await;
    invoice
}

/// Seeds booking 77 awaiting relocation and `INV-REL-2001` ($95.00).
pub async fn seed_relocation_invoice(store: &InMemoryStore) -> Invoice {
    store
        .seed_booking(booking(77, BookingStatus::RelocationRequested, ServiceType::EquipmentRental))
        .await;
    let invoice = Invoice::new(2001, USER_ID, "INV-REL-2001", dec!(95.00)).with_booking(77);
    store.seed_invoice(invoice.clone()).await;
    invoice
}
