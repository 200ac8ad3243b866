//! HTTP server setup and configuration.

use axum::http::{header, HeaderName, Method};
use axum::Router;
use reqwest::Client;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: Client,
    /// Process-wide log sink; `None` disables request logging.
    pub db: Option<SqlitePool>,
}

/// Permissive CORS for browser clients, mirroring what the proxied API
/// surfaces allow.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ])
}

/// Create the axum router.
///
/// A single catch-all handler serves every path; the gatekeeper inside it
/// enforces the route allow-list.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::proxy)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Build the outbound HTTP client with transport-level timeouts.
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Run the HTTP server until shutdown is requested, then drain the pool.
pub async fn run_server(config: Config, db: Option<SqlitePool>) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let state = AppState {
        config: Arc::new(config),
        http_client: build_http_client()?,
        db: db.clone(),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting tollgate proxy server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(pool) = db {
        pool.close().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install ctrl-c handler");
    }
    tracing::info!("Shutdown requested");
}
