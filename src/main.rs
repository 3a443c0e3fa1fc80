use anyhow::Context;
use axum::middleware;
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use erpserver::api_router::configure_api_routes;
use erpserver::core::config::AppConfig;
use erpserver::core::shared::state::AppState;
use erpserver::core::shared::utils::{create_conn, run_migrations};
use erpserver::directory::seed_admin;
use erpserver::security::auth_middleware;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();

    let pool = create_conn(&config.database.url).context("failed to build connection pool")?;
    {
        let mut conn = pool.get().context("database unreachable")?;
        run_migrations(&mut conn).map_err(|e| anyhow::anyhow!("{e}"))?;
        seed_admin(&mut conn, &config.auth).map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(pool, config));

    let app = configure_api_routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("erpserver listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
