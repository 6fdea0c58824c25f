use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use worldline_payments::api::{self, AppState};
use worldline_payments::config::{Config, GatewayConfig};
use worldline_payments::database::repository::OrderTransactionStore;
use worldline_payments::payments::providers::{MockGateway, WorldlineProvider};
use worldline_payments::payments::{GatewayStatusCode, PaymentGateway};
use worldline_payments::reconciliation::ReconciliationEngine;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(feature = "postgres")]
async fn build_store(config: &Config) -> Result<Arc<dyn OrderTransactionStore>> {
    use worldline_payments::database::postgres::PgOrderTransactionStore;
    use worldline_payments::database::{init_pool, run_migrations, PoolConfig};

    let Some(database) = &config.database else {
        anyhow::bail!("DATABASE_URL not set");
    };

    let pool_config = PoolConfig {
        max_connections: database.max_connections,
        ..PoolConfig::default()
    };
    let pool = init_pool(&database.url, Some(pool_config))
        .await
        .context("Failed to connect to the database")?;
    run_migrations(&pool)
        .await
        .context("Failed to apply database migrations")?;

    Ok(Arc::new(PgOrderTransactionStore::new(pool)))
}

#[cfg(not(feature = "postgres"))]
async fn build_store(_config: &Config) -> Result<Arc<dyn OrderTransactionStore>> {
    use worldline_payments::database::memory::InMemoryOrderTransactionStore;

    tracing::warn!("Built without the postgres feature, orders are kept in memory");
    Ok(Arc::new(InMemoryOrderTransactionStore::new()))
}

fn build_gateway(config: &Config) -> Result<Arc<dyn PaymentGateway>> {
    match &config.gateway {
        GatewayConfig::Worldline(worldline) => {
            tracing::info!(
                "Worldline endpoint: {} (live mode: {})",
                worldline.endpoint(),
                worldline.live_mode
            );
            let provider = WorldlineProvider::new(worldline.clone())
                .context("Failed to create the Worldline HTTP client")?;
            Ok(Arc::new(provider))
        }
        GatewayConfig::Mock => {
            tracing::warn!("Using the mock payment gateway");
            Ok(Arc::new(
                MockGateway::new().with_default_status(GatewayStatusCode::CREATED),
            ))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_tracing();

    // Load configuration
    let config = Config::from_env().context("Invalid configuration")?;

    // Log startup info
    tracing::info!("Starting Worldline payments service");
    tracing::info!("Environment: {}", config.server.environment);

    let store = build_store(&config).await?;
    let gateway = build_gateway(&config)?;
    let engine = Arc::new(ReconciliationEngine::new(gateway, store));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("HOST and PORT do not form a valid socket address")?;

    // Build router
    let app = api::router(AppState::new(engine, config));

    // Start server
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
