//! Core domain types for the edge inspection pipeline.
//!
//! Everything that crosses a module boundary lives here: the decoded
//! telemetry event, prediction results, and the durable record shapes
//! shared by the storage layer and the dashboard API.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Production Lines
// ============================================================================

/// The fixed set of production lines in the fab.
///
/// Each line publishes telemetry on its own transport topic and carries
/// independent state in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductionLine {
    Lithography,
    Etching,
    Deposition,
}

impl ProductionLine {
    /// All lines, in provisioning order.
    pub const ALL: [ProductionLine; 3] = [
        ProductionLine::Lithography,
        ProductionLine::Etching,
        ProductionLine::Deposition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionLine::Lithography => "Lithography",
            ProductionLine::Etching => "Etching",
            ProductionLine::Deposition => "Deposition",
        }
    }

    /// Parse a line name as it appears in telemetry payloads.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Lithography" => Some(ProductionLine::Lithography),
            "Etching" => Some(ProductionLine::Etching),
            "Deposition" => Some(ProductionLine::Deposition),
            _ => None,
        }
    }
}

impl fmt::Display for ProductionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Telemetry Event
// ============================================================================

/// One decoded sensor snapshot from a process tool for one wafer.
///
/// Produced by the decoder, consumed once by the pipeline, never mutated.
/// Field names match the wire payload emitted by the device layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub process_id: String,
    #[serde(
        serialize_with = "ts_format::serialize",
        deserialize_with = "ts_format::deserialize"
    )]
    pub timestamp: DateTime<Utc>,
    pub production_line: ProductionLine,
    pub wafer_id: String,
    pub chamber_temperature: f64,
    pub gas_flow_rate: f64,
    pub rf_power: f64,
    pub etch_depth: f64,
    pub rotation_speed: f64,
    pub vacuum_pressure: f64,
    pub stage_alignment_error: f64,
    pub vibration_level: f64,
    pub uv_exposure_intensity: f64,
    pub particle_count: i64,
    pub join_status: String,
    /// Ground-truth defect flag from offline datasets. Wire value is 0/1.
    /// Never used for inference — stored alongside the prediction so an
    /// external evaluator can score the model.
    #[serde(
        default,
        serialize_with = "defect_flag::serialize",
        deserialize_with = "defect_flag::deserialize"
    )]
    pub actual_defect: Option<bool>,
}

/// Flexible ISO-8601 timestamp handling.
///
/// Device payloads come from `datetime.isoformat()` and may or may not
/// carry a timezone offset; offset-less timestamps are taken as UTC.
mod ts_format {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_iso8601(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse an ISO-8601 timestamp, with or without timezone offset.
pub fn parse_iso8601(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("unrecognized timestamp format: {raw:?}"))
}

/// 0/1 wire encoding for the optional ground-truth flag.
pub(crate) mod defect_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Bool(bool),
    }

    pub fn serialize<S: Serializer>(v: &Option<bool>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(b) => s.serialize_i64(*b as i64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Bool(b)) => Ok(Some(b)),
            Some(Raw::Int(0)) => Ok(Some(false)),
            Some(Raw::Int(1)) => Ok(Some(true)),
            Some(Raw::Int(n)) => Err(serde::de::Error::custom(format!(
                "actual_defect must be 0 or 1, got {n}"
            ))),
        }
    }
}

// ============================================================================
// Prediction
// ============================================================================

/// Output of the inference engine for one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Calibrated defect probability in [0, 1].
    pub probability: f64,
    /// `probability >= threshold`.
    pub decision: bool,
}

// ============================================================================
// Durable Records
// ============================================================================

/// Per-line production status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineStatus {
    /// Initial state before the line's first processed event.
    Idle,
    /// Set by every successfully persisted event; never reverts to Idle.
    Running,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Idle => "Idle",
            LineStatus::Running => "Running",
        }
    }
}

/// One row of the `production_lines` tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineStateRecord {
    pub line: ProductionLine,
    pub status: LineStatus,
    pub current_wafer_id: Option<String>,
    /// Event timestamp of the newest persisted event for this line
    /// (most-recent-wins; display freshness only).
    pub last_updated: Option<DateTime<Utc>>,
}

impl LineStateRecord {
    /// The provisioned state of a line before any event arrives.
    pub fn idle(line: ProductionLine) -> Self {
        Self {
            line,
            status: LineStatus::Idle,
            current_wafer_id: None,
            last_updated: None,
        }
    }
}

/// One row of the append-only `sensor_data` tree: the full telemetry
/// snapshot plus the model's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub id: u64,
    #[serde(flatten)]
    pub event: TelemetryEvent,
    pub predicted_defect: bool,
    pub defect_probability: f64,
}

/// One row of the append-only `alerts` tree.
///
/// Created exactly when a defect decision fires; the only permitted
/// mutation is acknowledgment, which is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: u64,
    pub production_line: ProductionLine,
    pub wafer_id: String,
    pub message: String,
    pub defect_probability: f64,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Statistics
// ============================================================================

/// Cumulative per-line counters, process-lifetime scoped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCounters {
    pub total_processed: u64,
    pub total_defects: u64,
}
