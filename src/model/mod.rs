//! Inference artifact, feature derivation, and the defect classifier.

pub mod artifact;
pub mod engine;
pub mod features;

pub use artifact::{ArtifactError, InferenceArtifact, ARTIFACT_SCHEMA_VERSION};
pub use engine::{DefectModel, InferenceEngine, InferenceError, LogisticModel};
pub use features::{FeatureContractError, FeatureTransform, TransformError};

/// Ordered numeric input to the classifier, in the exact order the
/// artifact's `feature_names` declares. Created by the feature
/// transform, consumed once by the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub(crate) fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}
