//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and
//! exercise the /api/* endpoints using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use fabsentry::api::{create_app, DashboardState};
use fabsentry::pipeline::StatsAggregator;
use fabsentry::storage::FabStore;
use fabsentry::types::{PredictionResult, ProductionLine, TelemetryEvent};

fn test_state() -> (tempfile::TempDir, DashboardState) {
    let dir = tempfile::tempdir().unwrap();
    let store = FabStore::open(dir.path()).unwrap();
    let stats = Arc::new(StatsAggregator::new());
    (dir, DashboardState::new(store, stats, "test-run-1"))
}

fn event(line: ProductionLine, wafer: &str) -> TelemetryEvent {
    TelemetryEvent {
        process_id: "P-1".into(),
        timestamp: Utc::now(),
        production_line: line,
        wafer_id: wafer.into(),
        chamber_temperature: 70.0,
        gas_flow_rate: 120.0,
        rf_power: 1500.0,
        etch_depth: 3.0,
        rotation_speed: 3000.0,
        vacuum_pressure: 0.002,
        stage_alignment_error: 0.01,
        vibration_level: 0.3,
        uv_exposure_intensity: 300.0,
        particle_count: 10,
        join_status: "OK".into(),
        actual_defect: Some(false),
    }
}

/// Persist one defective inspection and return its alert id.
fn seed_alert(state: &DashboardState, line: ProductionLine, wafer: &str) -> u64 {
    let outcome = state
        .store
        .record_inspection(
            &event(line, wafer),
            &PredictionResult {
                probability: 0.92,
                decision: true,
            },
        )
        .unwrap();
    outcome.alert_id.unwrap()
}

async fn get(state: DashboardState, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = create_app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(state: DashboardState, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = create_app(state)
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// All GET endpoints return 200 on a fresh store.
#[tokio::test]
async fn get_endpoints_return_200() {
    let endpoints = [
        "/api/health",
        "/api/lines",
        "/api/inspections/recent",
        "/api/alerts/active",
        "/api/alerts/acknowledged",
        "/api/stats",
    ];
    for endpoint in endpoints {
        let (_dir, state) = test_state();
        let (status, _) = get(state, endpoint).await;
        assert_eq!(status, StatusCode::OK, "GET {endpoint}");
    }
}

/// Every success body carries the data/meta envelope.
#[tokio::test]
async fn responses_use_the_envelope() {
    let (_dir, state) = test_state();
    let (status, json) = get(state, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["meta"]["version"], "1");
    assert!(json["meta"]["timestamp"].is_string());
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["model_version"], "test-run-1");
}

#[tokio::test]
async fn lines_endpoint_lists_all_three_idle_lines() {
    let (_dir, state) = test_state();
    let (status, json) = get(state, "/api/lines").await;
    assert_eq!(status, StatusCode::OK);
    let lines = json["data"].as_array().unwrap();
    assert_eq!(lines.len(), 3);
    for line in lines {
        assert_eq!(line["status"], "Idle");
    }
}

#[tokio::test]
async fn recent_inspections_honors_limit_query() {
    let (_dir, state) = test_state();
    for i in 0..5 {
        state
            .store
            .record_inspection(
                &event(ProductionLine::Etching, &format!("W-{i}")),
                &PredictionResult {
                    probability: 0.10,
                    decision: false,
                },
            )
            .unwrap();
    }

    let (status, json) = get(state.clone(), "/api/inspections/recent?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let rows = json["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    // Newest first.
    assert_eq!(rows[0]["wafer_id"], "W-4");

    // An absurd limit is capped, not an error.
    let (status, json) = get(state, "/api/inspections/recent?limit=999999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn acknowledge_happy_path_returns_updated_alert() {
    let (_dir, state) = test_state();
    let alert_id = seed_alert(&state, ProductionLine::Etching, "W-BAD");

    let (status, json) = post(
        state.clone(),
        &format!("/api/alerts/{alert_id}/acknowledge"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["id"], alert_id);
    assert_eq!(json["data"]["acknowledged"], true);
    assert!(json["data"]["acknowledged_at"].is_string());

    // Moved from active to acknowledged.
    let (_, active) = get(state.clone(), "/api/alerts/active").await;
    assert!(active["data"].as_array().unwrap().is_empty());
    let (_, acked) = get(state, "/api/alerts/acknowledged").await;
    assert_eq!(acked["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn acknowledging_unknown_alert_returns_404() {
    let (_dir, state) = test_state();
    let (status, json) = post(state, "/api/alerts/12345/acknowledge").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("12345"));
}

#[tokio::test]
async fn double_acknowledge_returns_409() {
    let (_dir, state) = test_state();
    let alert_id = seed_alert(&state, ProductionLine::Deposition, "W-TWICE");
    let uri = format!("/api/alerts/{alert_id}/acknowledge");

    let (status, _) = post(state.clone(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = post(state, &uri).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "conflict");
}

#[tokio::test]
async fn stats_endpoint_reflects_aggregator() {
    let (_dir, state) = test_state();
    state.stats.record_processed(ProductionLine::Etching, true);
    state.stats.record_processed(ProductionLine::Etching, false);

    let (status, json) = get(state, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total_processed"], 2);
    assert_eq!(json["data"]["defects_detected"], 1);
    assert_eq!(json["data"]["dropped"]["decode"], 0);
}
