use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::info;

use provisioning_api::{app, config, middleware};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = config::Config::load().context("loading configuration")?;

    middleware::logging::init_logging(&config.logging);
    middleware::init_metrics().context("installing metrics recorder")?;

    info!(
        "Starting invitation provisioning service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = persistence::db::create_pool(&config.database.pool_config())
        .await
        .context("connecting to database")?;

    info!("Running database migrations...");
    persistence::db::run_migrations(&pool)
        .await
        .context("running migrations")?;
    info!("Migrations completed");

    let addr = config.socket_addr()?;
    let app = app::create_app(config, pool).await?;

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
