use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use booking_settlement::context::{RequestContext, UserIdentity};
use booking_settlement::events::NoopPublisher;
use booking_settlement::gateway::FakeGateway;
use booking_settlement::idempotency::{ChargeAttempt, IdempotencyKeyGenerator};
use booking_settlement::models::{
    current_status, BookingStatus, BookingStatusHistory, Invoice, InvoiceCategory, ServiceType,
};
use booking_settlement::observability::LatencyTimer;
use booking_settlement::repositories::{InMemoryStore, InvoiceLookup};
use booking_settlement::services::{
    generate_booking_number, to_minor_units, BookingStateMachine, PaymentMethodChoice,
    SettlementCoordinator, SettlementRequest,
};

fn benchmark_state_machine(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_machine");

    group.bench_function("full_rental_path", |b| {
        b.iter(|| {
            let mut status = BookingStatus::Scheduled;
            while let Some(next) =
                BookingStateMachine::next_status(status, ServiceType::EquipmentRental)
            {
                status = next;
            }
            black_box(status)
        });
    });

    group.bench_function("reject_every_target", |b| {
        b.iter(|| {
            let rejected = BookingStatus::ALL
                .iter()
                .filter(|to| {
                    BookingStateMachine::transition(
                        BookingStatus::Delivered,
                        **to,
                        ServiceType::EquipmentRental,
                    )
                    .is_err()
                })
                .count();
            black_box(rejected)
        });
    });

    group.finish();
}

fn benchmark_category_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("invoice_category");

    for number in ["INV-EXT-1007", "inv-rel-2001", "SWA-88", "INV-1042"] {
        group.bench_with_input(BenchmarkId::new("resolve", number), number, |b, number| {
            b.iter(|| black_box(InvoiceCategory::resolve(None, number, Some(30), None)));
        });
    }

    group.finish();
}

fn benchmark_idempotency_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("idempotency");
    let generator = IdempotencyKeyGenerator::with_default_config();

    group.bench_function("charge_key", |b| {
        let attempt = ChargeAttempt::new(1042, "pm_card_visa", 15_000);
        b.iter(|| black_box(generator.charge_key(&attempt)));
    });

    group.bench_function("charge_key_with_attempt", |b| {
        let attempt = ChargeAttempt::new(1042, "pm_card_visa", 15_000).with_attempt(3);
        b.iter(|| black_box(generator.charge_key(&attempt)));
    });

    group.finish();
}

fn benchmark_money(c: &mut Criterion) {
    let mut group = c.benchmark_group("money");

    for amount in ["150.00", "0.005", "12345.675"] {
        let value: Decimal = amount.parse().unwrap();
        group.bench_with_input(BenchmarkId::new("to_minor_units", amount), &value, |b, value| {
            b.iter(|| black_box(to_minor_units(*value)));
        });
    }

    group.finish();
}

fn benchmark_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("status_history");

    for size in [10, 100, 1000] {
        let now = chrono::Utc::now();
        let history: Vec<BookingStatusHistory> = (0..size)
            .map(|i| BookingStatusHistory {
                id: i,
                booking_id: 1,
                status: BookingStatus::InUse.to_string(),
                note: None,
                created_at: now - chrono::Duration::seconds(i % 7),
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("current_status", size), &history, |b, history| {
            b.iter(|| black_box(current_status(history).map(|h| h.id)));
        });
    }

    group.bench_function("booking_number", |b| {
        let today = chrono::Utc::now().date_naive();
        b.iter(|| black_box(generate_booking_number(today)));
    });

    group.finish();
}

fn benchmark_in_memory_settlement(c: &mut Criterion) {
    let mut group = c.benchmark_group("settlement");
    group.measurement_time(Duration::from_secs(10));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let ctx = RequestContext::new(UserIdentity {
        id: 7,
        email: "bench@example.com".to_string(),
        name: "Bench".to_string(),
    });

    group.bench_function("ad_hoc_invoice", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let store = InMemoryStore::new();
                let gateway = FakeGateway::new();
                gateway.register_method("pm_card_visa", "visa", "4242");
                let coordinator = SettlementCoordinator::new(
                    Arc::new(store.clone()),
                    Arc::new(gateway),
                    Arc::new(NoopPublisher),
                    "usd",
                );
                (store, coordinator)
            },
            |(store, coordinator)| {
                let ctx = ctx.clone();
                async move {
                    store
                        .seed_invoice(Invoice::new(1, 7, "INV-1", Decimal::new(2500, 2)))
                        .await;
                    let result = coordinator
                        .settle(
                            &ctx,
                            SettlementRequest {
                                lookup: InvoiceLookup::Id(1),
                                amount: Decimal::new(2500, 2),
                                payment_method: PaymentMethodChoice::Fresh(
                                    "pm_card_visa".to_string(),
                                ),
                                save_payment_method: false,
                                attempt: None,
                                payment_intent_id: None,
                            },
                        )
                        .await;
                    black_box(result.is_ok())
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn benchmark_latency_timer(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_timer");

    group.bench_function("create_and_elapsed", |b| {
        b.iter(|| {
            let timer = LatencyTimer::new();
            let elapsed = timer.elapsed_ms();
            black_box(elapsed)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_state_machine,
    benchmark_category_resolution,
    benchmark_idempotency_keys,
    benchmark_money,
    benchmark_history,
    benchmark_in_memory_settlement,
    benchmark_latency_timer,
);

criterion_main!(benches);
