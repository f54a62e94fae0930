//! REST API module using Axum.
//!
//! Serves the dashboard consumer: line states, recent inspections,
//! alert queries, the acknowledgment command, statistics, and health.

pub mod envelope;
pub mod handlers;

pub use handlers::DashboardState;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `FABSENTRY_CORS_ORIGINS` to a comma-separated list of allowed
/// origins for dashboard development against a separate dev server.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("FABSENTRY_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        }
        Err(_) => CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    }
}

/// Create the complete application router.
pub fn create_app(state: DashboardState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/lines", get(handlers::get_lines))
        .route("/api/inspections/recent", get(handlers::get_recent_inspections))
        .route("/api/alerts/active", get(handlers::get_active_alerts))
        .route("/api/alerts/acknowledged", get(handlers::get_acknowledged_alerts))
        .route("/api/alerts/:id/acknowledge", post(handlers::acknowledge_alert))
        .route("/api/stats", get(handlers::get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
