use std::sync::Arc;
use tripdesk_api::{app, AppState};
use tripdesk_core::{EventPublisher, NoopPublisher};
use tripdesk_store::{Config, DbClient, EventProducer, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripdesk_api=debug,tripdesk_ledger=info,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting TripDesk API on port {}", config.server.port);

    let db = DbClient::new(&config.database).await?;
    db.migrate().await?;

    let events: Arc<dyn EventPublisher> = match &config.kafka {
        Some(kafka) => {
            tracing::info!("Publishing ledger events to {}", kafka.brokers);
            Arc::new(EventProducer::new(&kafka.brokers)?)
        }
        None => {
            tracing::warn!("No Kafka brokers configured; ledger events are not published");
            Arc::new(NoopPublisher)
        }
    };

    let store = Arc::new(PgStore::new(db.pool.clone()));
    let app_state = AppState::new(store, events, config.ledger.currency.clone());
    let app = app(app_state);

    let addr = config.bind_address();
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
