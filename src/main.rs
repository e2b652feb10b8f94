//! Animart order workflow service

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use animart_orders::api::{self, AppState};
use animart_orders::config::Config;
use animart_orders::integrations::{DisabledEmailSender, EmailSender, HttpEmailSender, HttpShippingProvider, ShippingProvider, UnconfiguredShipping};
use animart_orders::store::PgStore;
use animart_orders::tracking::TrackingIngestor;
use animart_orders::workflow::{Collaborators, OrderWorkflow};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => { tracing::warn!(error = %e, "NATS unavailable, order events disabled"); None }
        },
        None => None,
    };

    let shipping: Arc<dyn ShippingProvider> = match &config.shipping.api_url {
        Some(url) => Arc::new(HttpShippingProvider::new(url, config.shipping.api_token.clone(), config.http_timeout)?),
        None => { tracing::warn!("SHIPPING_API_URL not set, dispatch bookings will fail"); Arc::new(UnconfiguredShipping) }
    };
    let mailer: Arc<dyn EmailSender> = match &config.email.api_key {
        Some(key) => Arc::new(HttpEmailSender::new(&config.email.api_url, key, &config.email.from, config.http_timeout)?),
        None => { tracing::warn!("EMAIL_API_KEY not set, customer emails will be logged as failed"); Arc::new(DisabledEmailSender) }
    };

    let store = Arc::new(PgStore::new(db));
    let deps = Collaborators { orders: store.clone(), history: store.clone(), email_log: store.clone(), shipping, mailer };
    let workflow = OrderWorkflow::new(deps, &config.store_name, config.shipping.booking_timeout).with_events(nats.clone());
    let tracking = TrackingIngestor::new(store.clone(), store.clone(), store.clone()).with_events(nats);

    let state = AppState {
        workflow: Arc::new(workflow),
        tracking: Arc::new(tracking),
        orders: store.clone(), history: store.clone(), email_log: store.clone(), tracking_events: store,
        webhook_token: config.shipping.webhook_token.clone(),
    };
    let app = api::router(state);

    tracing::info!("Animart orders listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
