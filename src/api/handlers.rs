//! API route handlers.
//!
//! The dashboard is a read-only consumer of the persisted tables plus
//! the acknowledgment command — no write path into the pipeline exists
//! here by design.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::pipeline::StatsAggregator;
use crate::storage::{FabStore, StoreError};

// ============================================================================
// API State
// ============================================================================

/// Shared state for API handlers.
#[derive(Clone)]
pub struct DashboardState {
    pub store: FabStore,
    pub stats: Arc<StatsAggregator>,
    pub model_version: String,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(store: FabStore, stats: Arc<StatsAggregator>, model_version: &str) -> Self {
        Self {
            store,
            stats,
            model_version: model_version.to_string(),
            started_at: Utc::now(),
        }
    }
}

// ============================================================================
// Query / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_version: String,
    uptime_seconds: i64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(State(state): State<DashboardState>) -> Response {
    ApiResponse::ok(HealthResponse {
        status: "ok",
        model_version: state.model_version.clone(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// All production-line states, including lines still Idle.
pub async fn get_lines(State(state): State<DashboardState>) -> Response {
    match state.store.line_states() {
        Ok(lines) => ApiResponse::ok(lines),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

/// Most recent inspections, newest first. Default 50, capped at 500.
pub async fn get_recent_inspections(
    State(state): State<DashboardState>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).min(500);
    ApiResponse::ok(state.store.recent_inspections(limit))
}

/// Unacknowledged alerts, newest first.
pub async fn get_active_alerts(State(state): State<DashboardState>) -> Response {
    ApiResponse::ok(state.store.active_alerts())
}

/// Recently acknowledged alerts. Default 10.
pub async fn get_acknowledged_alerts(
    State(state): State<DashboardState>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(10).min(500);
    ApiResponse::ok(state.store.acknowledged_alerts(limit))
}

/// Acknowledge one alert by id. Terminal; never touches line state.
pub async fn acknowledge_alert(
    State(state): State<DashboardState>,
    Path(id): Path<u64>,
) -> Response {
    match state.store.acknowledge_alert(id) {
        Ok(alert) => ApiResponse::ok(alert),
        Err(e @ StoreError::AlertNotFound(_)) => ApiErrorResponse::not_found(e.to_string()),
        Err(e @ StoreError::AlreadyAcknowledged(_)) => ApiErrorResponse::conflict(e.to_string()),
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

/// Point-in-time processing statistics snapshot.
pub async fn get_stats(State(state): State<DashboardState>) -> Response {
    ApiResponse::ok(state.stats.snapshot())
}
