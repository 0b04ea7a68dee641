//! Read API: Axum web server over the escrow state.
//!
//! JSON only. CORS is open for GET so a browser front end on another
//! origin can poll it.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{ApiState, AppState};

/// Start the API server.
///
/// This spawns a background task; it doesn't block. Bind or serve errors
/// are logged and end the task.
pub fn spawn_api(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "API server starting on http://localhost:{port}");

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(port, error = %e, "Failed to bind API port");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::get_status))
        .route("/api/price", get(routes::get_price))
        .route("/api/bets/:id", get(routes::get_bet))
        .route("/api/users/:address/bets", get(routes::get_user_bets))
        .route("/api/events", get(routes::get_events))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
