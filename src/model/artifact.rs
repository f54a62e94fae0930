//! Inference artifact loading.
//!
//! The training side exports a single versioned JSON bundle holding the
//! classifier weights, scaler parameters, categorical vocabularies, the
//! ordered feature-name list, and the decision threshold. The gateway
//! loads it exactly once at startup and treats its contents as opaque
//! configuration — nothing in here is recomputed at runtime.
//!
//! A load or validation failure is fatal: the process cannot serve
//! without a coherent artifact.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

/// Artifact schema revision this gateway understands.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse artifact {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("artifact schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("artifact is internally inconsistent: {0}")]
    Inconsistent(String),
}

/// Serialized classifier parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Model family tag, e.g. `"logistic_regression"`. The engine
    /// refuses kinds it has no implementation for.
    pub kind: String,
    /// One weight per feature, aligned with `feature_names`.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// Per-feature standardization parameters, aligned with `feature_names`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

/// Categorical value → integer code tables baked in at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabularies {
    #[serde(rename = "Tool_Type")]
    pub tool_type: HashMap<String, i64>,
    #[serde(rename = "Join_Status")]
    pub join_status: HashMap<String, i64>,
}

/// The opaque model bundle, as exported by training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceArtifact {
    pub schema_version: u32,
    /// Free-form training run identifier, logged with every startup.
    pub model_version: String,
    pub model: ModelParams,
    pub scaler: ScalerParams,
    pub vocabularies: Vocabularies,
    /// Exact feature order the model was trained on.
    pub feature_names: Vec<String>,
    /// Decision boundary on predicted probability.
    pub threshold: f64,
}

impl InferenceArtifact {
    /// Load and validate an artifact from disk.
    pub fn load(path: &str) -> Result<Self, ArtifactError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_string(),
            source,
        })?;
        let artifact: InferenceArtifact =
            serde_json::from_str(&raw).map_err(|source| ArtifactError::Parse {
                path: path.to_string(),
                source,
            })?;
        artifact.validate()?;
        info!(
            "✅ Inference artifact loaded: version={} features={} threshold={}",
            artifact.model_version,
            artifact.feature_names.len(),
            artifact.threshold
        );
        Ok(artifact)
    }

    /// Internal consistency checks. Feature-contract checks against the
    /// pipeline's own feature set live in the feature transform.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(ArtifactError::SchemaVersion {
                found: self.schema_version,
                expected: ARTIFACT_SCHEMA_VERSION,
            });
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ArtifactError::Inconsistent(format!(
                "threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        let n = self.feature_names.len();
        if n == 0 {
            return Err(ArtifactError::Inconsistent(
                "feature_names is empty".into(),
            ));
        }
        for (label, len) in [
            ("model.coefficients", self.model.coefficients.len()),
            ("scaler.means", self.scaler.means.len()),
            ("scaler.scales", self.scaler.scales.len()),
        ] {
            if len != n {
                return Err(ArtifactError::Inconsistent(format!(
                    "{label} has {len} entries but feature_names declares {n}"
                )));
            }
        }
        if self
            .model
            .coefficients
            .iter()
            .chain(self.scaler.means.iter())
            .chain([&self.model.intercept])
            .any(|v| !v.is_finite())
        {
            return Err(ArtifactError::Inconsistent(
                "non-finite model or scaler parameter".into(),
            ));
        }
        if self.scaler.scales.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(ArtifactError::Inconsistent(
                "scaler.scales must be finite and non-zero".into(),
            ));
        }
        if self.vocabularies.tool_type.is_empty() || self.vocabularies.join_status.is_empty() {
            return Err(ArtifactError::Inconsistent(
                "categorical vocabularies must not be empty".into(),
            ));
        }
        Ok(())
    }
}
