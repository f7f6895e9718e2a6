//! Carvatoo Checkout - cart and order service

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carvatoo_checkout::auth::StaticTokenVerifier;
use carvatoo_checkout::services::{EventPublisher, MockPaymentGateway, NatsPublisher, NoopPublisher};
use carvatoo_checkout::store::{PgStore, Stores};
use carvatoo_checkout::{router, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let stores = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            tracing::info!("connected to PostgreSQL");
            Stores::shared(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping data in memory");
            Stores::in_memory()
        }
    };

    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match NatsPublisher::connect(url).await {
            Ok(publisher) => Arc::new(publisher),
            Err(error) => {
                tracing::warn!(%error, "NATS unavailable, order events will be dropped");
                Arc::new(NoopPublisher)
            }
        },
        None => Arc::new(NoopPublisher),
    };

    let state = AppState::new(
        stores,
        config.shipping,
        Arc::new(MockPaymentGateway::new(&config.instant_payment_methods)),
        events,
        Arc::new(StaticTokenVerifier::new(config.api_tokens.clone())),
    );

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Carvatoo checkout listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, router(state)).await?;
    Ok(())
}
