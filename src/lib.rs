//! FabSentry — edge quality inspection for semiconductor fab telemetry.
//!
//! Consumes per-line telemetry events, derives the model's feature
//! vector, classifies defect risk with a pre-trained artifact, persists
//! each outcome atomically, and maintains alert and production-line
//! state for an external dashboard.
//!
//! ## Architecture
//!
//! - **Acquisition**: pluggable intake sources + payload decoder
//! - **Model**: versioned inference artifact, feature transform, engine
//! - **Pipeline**: bounded queue, fixed worker pool, statistics
//! - **Storage**: sled-backed tables with an atomic per-event unit of work
//! - **API**: axum endpoints for the dashboard consumer

pub mod acquisition;
pub mod api;
pub mod config;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export the types most callers need.
pub use acquisition::{EventSource, IntakeFrame, TelemetryDecoder};
pub use config::FabConfig;
pub use model::{DefectModel, FeatureTransform, InferenceArtifact, InferenceEngine};
pub use pipeline::{EdgePipeline, StatsAggregator};
pub use storage::FabStore;
pub use types::{
    AlertRecord, InspectionRecord, LineStateRecord, LineStatus, PredictionResult, ProductionLine,
    TelemetryEvent,
};
