//! Feature derivation.
//!
//! Maps a decoded [`TelemetryEvent`] into the ordered numeric vector the
//! classifier was trained on: numeric readings pass through the stored
//! `(raw - mean) / scale` standardization, categorical fields go through
//! the vocabulary tables baked into the artifact.
//!
//! An unseen categorical value is a hard per-event failure — silently
//! defaulting it would corrupt the model's probability calibration. A
//! feature-order mismatch between artifact and pipeline is a fatal
//! startup condition (version skew), caught when the transform is built.

use crate::model::artifact::InferenceArtifact;
use crate::model::FeatureVector;
use crate::types::TelemetryEvent;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// The feature names this pipeline knows how to derive, as exported by
/// training. The artifact declares the authoritative *order*; this set
/// pins the *membership*.
pub mod feature_names {
    pub const CHAMBER_TEMPERATURE: &str = "Chamber_Temperature";
    pub const GAS_FLOW_RATE: &str = "Gas_Flow_Rate";
    pub const RF_POWER: &str = "RF_Power";
    pub const ETCH_DEPTH: &str = "Etch_Depth";
    pub const ROTATION_SPEED: &str = "Rotation_Speed";
    pub const VACUUM_PRESSURE: &str = "Vacuum_Pressure";
    pub const STAGE_ALIGNMENT_ERROR: &str = "Stage_Alignment_Error";
    pub const VIBRATION_LEVEL: &str = "Vibration_Level";
    pub const UV_EXPOSURE_INTENSITY: &str = "UV_Exposure_Intensity";
    pub const PARTICLE_COUNT: &str = "Particle_Count";
    pub const TOOL_TYPE: &str = "Tool_Type";
    pub const JOIN_STATUS: &str = "Join_Status";

    pub const ALL: [&str; 12] = [
        CHAMBER_TEMPERATURE,
        GAS_FLOW_RATE,
        RF_POWER,
        ETCH_DEPTH,
        ROTATION_SPEED,
        VACUUM_PRESSURE,
        STAGE_ALIGNMENT_ERROR,
        VIBRATION_LEVEL,
        UV_EXPOSURE_INTENSITY,
        PARTICLE_COUNT,
        TOOL_TYPE,
        JOIN_STATUS,
    ];
}

/// Per-event transform failure: the event is dropped, the worker lives.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("value {value:?} for categorical feature {feature} is outside the trained vocabulary")]
    UnknownCategory {
        feature: &'static str,
        value: String,
    },
}

/// Artifact/pipeline feature skew. Fatal at startup, never per-event.
#[derive(Debug, Error)]
#[error("feature contract violation: {0}")]
pub struct FeatureContractError(pub String);

/// Compiled transform: artifact feature order plus scaling and
/// vocabulary tables, validated against the pipeline's feature set.
#[derive(Debug, Clone)]
pub struct FeatureTransform {
    feature_names: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
    tool_vocab: HashMap<String, i64>,
    join_vocab: HashMap<String, i64>,
}

impl FeatureTransform {
    /// Build the transform, verifying the artifact's declared features
    /// are exactly the set this pipeline can derive.
    pub fn from_artifact(artifact: &InferenceArtifact) -> Result<Self, FeatureContractError> {
        let declared: Vec<&str> = artifact.feature_names.iter().map(|s| s.as_str()).collect();

        for name in &declared {
            if !feature_names::ALL.contains(name) {
                return Err(FeatureContractError(format!(
                    "artifact declares feature {name:?} this pipeline cannot derive"
                )));
            }
        }
        let unique: HashSet<&str> = declared.iter().copied().collect();
        if unique.len() != declared.len() {
            return Err(FeatureContractError(
                "artifact declares a feature more than once".into(),
            ));
        }
        if declared.len() != feature_names::ALL.len() {
            let missing: Vec<&str> = feature_names::ALL
                .iter()
                .filter(|n| !unique.contains(**n))
                .copied()
                .collect();
            return Err(FeatureContractError(format!(
                "artifact declares {} features, pipeline derives {}; missing {missing:?}",
                declared.len(),
                feature_names::ALL.len()
            )));
        }

        Ok(Self {
            feature_names: artifact.feature_names.clone(),
            means: artifact.scaler.means.clone(),
            scales: artifact.scaler.scales.clone(),
            tool_vocab: artifact.vocabularies.tool_type.clone(),
            join_vocab: artifact.vocabularies.join_status.clone(),
        })
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    /// Derive the ordered, scaled feature vector for one event.
    pub fn vector(&self, event: &TelemetryEvent) -> Result<FeatureVector, TransformError> {
        let mut values = Vec::with_capacity(self.feature_names.len());
        for (i, name) in self.feature_names.iter().enumerate() {
            let raw = self.raw_value(name, event)?;
            values.push((raw - self.means[i]) / self.scales[i]);
        }
        Ok(FeatureVector::new(values))
    }

    fn raw_value(&self, name: &str, event: &TelemetryEvent) -> Result<f64, TransformError> {
        use feature_names::*;
        match name {
            CHAMBER_TEMPERATURE => Ok(event.chamber_temperature),
            GAS_FLOW_RATE => Ok(event.gas_flow_rate),
            RF_POWER => Ok(event.rf_power),
            ETCH_DEPTH => Ok(event.etch_depth),
            ROTATION_SPEED => Ok(event.rotation_speed),
            VACUUM_PRESSURE => Ok(event.vacuum_pressure),
            STAGE_ALIGNMENT_ERROR => Ok(event.stage_alignment_error),
            VIBRATION_LEVEL => Ok(event.vibration_level),
            UV_EXPOSURE_INTENSITY => Ok(event.uv_exposure_intensity),
            PARTICLE_COUNT => Ok(event.particle_count as f64),
            TOOL_TYPE => self
                .tool_vocab
                .get(event.production_line.as_str())
                .map(|code| *code as f64)
                .ok_or_else(|| TransformError::UnknownCategory {
                    feature: TOOL_TYPE,
                    value: event.production_line.as_str().to_string(),
                }),
            JOIN_STATUS => self
                .join_vocab
                .get(&event.join_status)
                .map(|code| *code as f64)
                .ok_or_else(|| TransformError::UnknownCategory {
                    feature: JOIN_STATUS,
                    value: event.join_status.clone(),
                }),
            // Membership is validated in from_artifact.
            other => unreachable!("feature {other:?} passed contract validation"),
        }
    }
}
