//! Gateway configuration.
//!
//! Loaded from a TOML file with built-in defaults for every field, so a
//! bare checkout runs against the bundled simulator without any config.
//!
//! ## Loading order
//!
//! 1. `FABSENTRY_CONFIG` environment variable (path to TOML file)
//! 2. `fabsentry.toml` in the current working directory
//! 3. Built-in defaults
//!
//! CLI flags in `main` override individual fields after loading.

use crate::types::ProductionLine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Default config filename looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fabsentry.toml";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "FABSENTRY_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

/// Binding of one production line to its intake topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBinding {
    pub topic: String,
    pub line: ProductionLine,
}

/// Intake transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Broker / simulator address for the TCP source.
    pub host: String,
    pub port: u16,
    /// One topic per production line.
    pub topics: Vec<TopicBinding>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            topics: vec![
                TopicBinding {
                    topic: "factory/line1/lithography".to_string(),
                    line: ProductionLine::Lithography,
                },
                TopicBinding {
                    topic: "factory/line2/etching".to_string(),
                    line: ProductionLine::Etching,
                },
                TopicBinding {
                    topic: "factory/line3/deposition".to_string(),
                    line: ProductionLine::Deposition,
                },
            ],
        }
    }
}

impl IntakeConfig {
    /// Look up the production line bound to a topic.
    pub fn line_for_topic(&self, topic: &str) -> Option<ProductionLine> {
        self.topics
            .iter()
            .find(|b| b.topic == topic)
            .map(|b| b.line)
    }

    pub fn topic_for_line(&self, line: ProductionLine) -> Option<&str> {
        self.topics
            .iter()
            .find(|b| b.line == line)
            .map(|b| b.topic.as_str())
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|b| b.topic.clone()).collect()
    }
}

/// Worker pool and intake queue sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed number of workers draining the intake queue.
    pub workers: usize,
    /// Bounded intake queue capacity. A full queue drops frames with a
    /// counted metric — backpressure, never unbounded buffering.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Durable store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/fabsentry_db".to_string(),
        }
    }
}

/// Inference artifact location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub path: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: "models/edge_model.json".to_string(),
        }
    }
}

/// Dashboard API server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FabConfig {
    pub intake: IntakeConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub artifact: ArtifactConfig,
    pub api: ApiConfig,
}

impl FabConfig {
    /// Load configuration using the documented lookup order.
    ///
    /// A missing file falls back to defaults; an unreadable or
    /// unparseable file is an error (a half-applied config is worse
    /// than none).
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            info!("Loading config from {CONFIG_ENV_VAR}={path}");
            return Self::from_file(&path);
        }
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            info!("Loading config from ./{DEFAULT_CONFIG_FILE}");
            return Self::from_file(DEFAULT_CONFIG_FILE);
        }
        warn!("No config file found — using built-in defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config: FabConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.workers must be at least 1".into(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue_capacity must be at least 1".into(),
            ));
        }
        if self.intake.topics.is_empty() {
            return Err(ConfigError::Invalid(
                "intake.topics must bind at least one production line".into(),
            ));
        }
        for line in ProductionLine::ALL {
            let bound = self.intake.topics.iter().filter(|b| b.line == line).count();
            if bound > 1 {
                return Err(ConfigError::Invalid(format!(
                    "intake.topics binds line {line} {bound} times"
                )));
            }
        }
        let mut topics: Vec<&str> = self.intake.topics.iter().map(|b| b.topic.as_str()).collect();
        topics.sort_unstable();
        topics.dedup();
        if topics.len() != self.intake.topics.len() {
            return Err(ConfigError::Invalid(
                "intake.topics contains duplicate topic names".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FabConfig::default();
        config.validate().unwrap();
        assert_eq!(config.intake.topics.len(), 3);
        assert_eq!(
            config.intake.line_for_topic("factory/line2/etching"),
            Some(ProductionLine::Etching)
        );
        assert_eq!(config.intake.line_for_topic("factory/line9/unknown"), None);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: FabConfig = toml::from_str(
            r#"
            [pipeline]
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.queue_capacity, 256);
        assert_eq!(config.api.addr, "0.0.0.0:8080");
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = FabConfig::default();
        config.pipeline.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_line_binding() {
        let mut config = FabConfig::default();
        config.intake.topics.push(TopicBinding {
            topic: "factory/line4/etching-b".to_string(),
            line: ProductionLine::Etching,
        });
        assert!(config.validate().is_err());
    }
}
