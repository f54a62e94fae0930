//! Inference engine.
//!
//! The pipeline sees the classifier through the [`DefectModel`] trait:
//! any calibrated binary classifier that maps a feature vector to
//! `P(defect = 1)`. The engine applies the artifact's fixed decision
//! threshold on top. Inference failures are reported, never silently
//! mapped to "no defect" — that would understate risk.

use crate::model::artifact::InferenceArtifact;
use crate::model::FeatureVector;
use crate::types::PredictionResult;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("feature vector has {got} features, model expects {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("model produced probability {0} outside [0, 1]")]
    InvalidProbability(f64),

    #[error("artifact model kind {0:?} has no implementation in this gateway")]
    UnsupportedModel(String),
}

/// A calibrated binary defect classifier.
///
/// Implementations must be deterministic: identical input on the same
/// process yields the identical probability.
pub trait DefectModel: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64, InferenceError>;

    /// Model family tag for logging.
    fn kind(&self) -> &'static str;
}

/// Logistic regression over standardized features.
pub struct LogisticModel {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LogisticModel {
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }
}

impl DefectModel for LogisticModel {
    fn predict(&self, features: &[f64]) -> Result<f64, InferenceError> {
        if features.len() != self.coefficients.len() {
            return Err(InferenceError::DimensionMismatch {
                got: features.len(),
                expected: self.coefficients.len(),
            });
        }
        let z: f64 = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept;
        // Standard sigmoid; z from validated finite inputs cannot be NaN,
        // and exp saturates gracefully at the extremes.
        Ok(1.0 / (1.0 + (-z).exp()))
    }

    fn kind(&self) -> &'static str {
        "logistic_regression"
    }
}

/// Applies the loaded model plus the artifact's decision threshold.
pub struct InferenceEngine {
    model: Box<dyn DefectModel>,
    threshold: f64,
    model_version: String,
}

impl InferenceEngine {
    /// Wrap an arbitrary model. Used by tests to inject stub models with
    /// fixed probabilities.
    pub fn new(
        model: Box<dyn DefectModel>,
        threshold: f64,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            model,
            threshold,
            model_version: model_version.into(),
        }
    }

    /// Instantiate the model family the artifact declares.
    pub fn from_artifact(artifact: &InferenceArtifact) -> Result<Self, InferenceError> {
        let model: Box<dyn DefectModel> = match artifact.model.kind.as_str() {
            "logistic_regression" => Box::new(LogisticModel::new(
                artifact.model.coefficients.clone(),
                artifact.model.intercept,
            )),
            other => return Err(InferenceError::UnsupportedModel(other.to_string())),
        };
        Ok(Self::new(
            model,
            artifact.threshold,
            artifact.model_version.clone(),
        ))
    }

    /// Score one feature vector and apply the decision rule.
    pub fn classify(&self, vector: &FeatureVector) -> Result<PredictionResult, InferenceError> {
        let probability = self.model.predict(vector.as_slice())?;
        if !(0.0..=1.0).contains(&probability) {
            // Guards black-box models; LogisticModel cannot trip this.
            return Err(InferenceError::InvalidProbability(probability));
        }
        Ok(PredictionResult {
            probability,
            decision: probability >= self.threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn model_kind(&self) -> &'static str {
        self.model.kind()
    }
}
