//! API — Axum web server exposing the ledger and simulator.
//!
//! All endpoints speak JSON. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().expect("static origin"))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route(
            "/api/institutions",
            get(routes::list_institutions).post(routes::create_institution),
        )
        .route(
            "/api/institutions/:name/icon",
            post(routes::upload_institution_icon),
        )
        .route(
            "/api/institutions/icons/:file_name",
            get(routes::get_institution_icon),
        )
        .route(
            "/api/cycles",
            get(routes::list_cycles).post(routes::create_cycle),
        )
        .route(
            "/api/cycles/:id",
            axum::routing::patch(routes::rename_cycle).delete(routes::delete_cycle),
        )
        .route("/api/cycles/:id/reset", post(routes::reset_cycle))
        .route(
            "/api/cycles/:id/undo-last",
            post(routes::undo_last_transaction),
        )
        .route(
            "/api/transactions",
            get(routes::list_transactions).post(routes::create_transaction),
        )
        .route(
            "/api/transactions/:id",
            axum::routing::put(routes::update_transaction).delete(routes::delete_transaction),
        )
        .route("/api/simulate", post(routes::simulate))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until ctrl-c.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
        })
        .await
        .context("API server error")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
