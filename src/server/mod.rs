//! HTTP control surface
//!
//! Session control (`/trading/start`, `/trading/stop`, `/trading/status`)
//! plus pass-through endpoints to the exchange. Every route is served both at
//! the root and under `/api`.

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use crate::config::ServerConfig;
use crate::exchange::Exchange;
use crate::session::SessionController;

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

/// Build the application with all routes and middleware
pub fn build_app<E: Exchange>(state: AppState<E>) -> Router {
    routes::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

/// Serve until Ctrl-C, then force-stop every live session
pub async fn serve<E: Exchange>(config: &ServerConfig, exchange: Arc<E>) -> Result<()> {
    let controller = Arc::new(SessionController::new(Arc::clone(&exchange)));
    let app = build_app(AppState::new(Arc::clone(&controller), exchange));

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Control API listening on http://{}", addr);
    info!("Routes available at http://{0}/ and http://{0}/api", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    controller.shutdown().await;
    info!("Server stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
        Err(e) => {
            error!("Error setting up signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
