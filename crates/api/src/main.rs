//! Slotwise API server

use anyhow::Context;
use slotwise_api::{routes, AppState, Config};
use slotwise_billing::PlanCatalog;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = slotwise_shared::db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    slotwise_shared::db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let catalog = PlanCatalog::load(&pool)
        .await
        .context("Failed to load plan catalog")?;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config, catalog);
    let router = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    tracing::info!(address = %bind_address, "Slotwise API listening");

    axum::serve(listener, router)
        .await
        .context("Server error")?;

    Ok(())
}
