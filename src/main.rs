use std::sync::Arc;
use std::time::Duration;

use booking_settlement::api::{create_router, AppState};
use booking_settlement::config::Settings;
use booking_settlement::events::{
    EventProducer, EventPublisher, KafkaEventPublisher, NoopPublisher, ProducerConfig,
};
use booking_settlement::gateway::StripeGateway;
use booking_settlement::observability::{
    init_logging, init_metrics, HealthChecker, KafkaHealth, LogConfig,
};
use booking_settlement::repositories::{PgStore, SettlementStore};
use booking_settlement::services::{
    BookingLifecycleService, ReconciliationScheduler, ReconciliationService,
    SettlementCoordinator,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&LogConfig::from(&settings.application));
    let metrics_handle = init_metrics()?;
    info!("Configuration loaded");

    // Connect to PostgreSQL
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    // Kafka is optional; settlement never depends on it
    let (publisher, kafka_health): (Arc<dyn EventPublisher>, KafkaHealth) = if settings.kafka.enabled {
        let mut producer = EventProducer::new(ProducerConfig::from(&settings.kafka));
        match producer.connect().await {
            Ok(()) => {
                let health = producer
                    .client()
                    .map(KafkaHealth::Connected)
                    .unwrap_or(KafkaHealth::Unavailable);
                (
                    Arc::new(KafkaEventPublisher::new(producer, settings.kafka.clone())),
                    health,
                )
            }
            Err(e) => {
                warn!("Kafka unavailable, events will not be published: {}", e);
                (Arc::new(NoopPublisher), KafkaHealth::Unavailable)
            }
        }
    } else {
        (Arc::new(NoopPublisher), KafkaHealth::Disabled)
    };

    let store: Arc<dyn SettlementStore> = Arc::new(PgStore::new(pool.clone()));
    let gateway = Arc::new(StripeGateway::new(&settings.gateway)?);

    let coordinator = Arc::new(SettlementCoordinator::new(
        store.clone(),
        gateway,
        publisher.clone(),
        settings.gateway.currency.clone(),
    ));
    let lifecycle = Arc::new(BookingLifecycleService::new(store, publisher));
    let health_checker = Arc::new(HealthChecker::new(Some(pool), kafka_health));

    let scheduler = ReconciliationScheduler::new(
        Arc::new(ReconciliationService::new(coordinator.clone())),
        settings.reconciliation.interval_secs,
        settings.reconciliation.batch_size,
    );
    if settings.reconciliation.enabled {
        scheduler.start();
        info!(
            "Reconciliation scheduled every {}s",
            settings.reconciliation.interval_secs
        );
    }

    let state = AppState::new(coordinator, lifecycle, health_checker).with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    scheduler.stop();
    info!("Shutdown complete");
    Ok(())
}
