//! Pipeline configuration
//!
//! Defaults reproduce the fixed constants of the pipeline (30 vertex slots,
//! sentinel `-1`, threshold 0.5, the three label names). A TOML file can
//! override any subset; `MESHVIS_*` environment variables are applied on
//! top of that.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::classifier::{ClassifierConfig, DEFAULT_THRESHOLD};
use crate::encoder::EncoderConfig;
use crate::errors::{Result, VisError};
use crate::features::LabelConfig;

/// Inference output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Probability above which an output is `true`
    pub threshold: f32,
    /// Prefix added to the input file name to form the output file name
    pub output_prefix: String,
    /// Prefix added to each label name to form the prediction column name
    pub column_prefix: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            output_prefix: "Predicted_".to_string(),
            column_prefix: "Predicted_".to_string(),
        }
    }
}

impl PredictionConfig {
    /// Prediction column names in label order
    pub fn prediction_columns(&self, labels: &LabelConfig) -> [String; 3] {
        labels
            .names()
            .map(|name| format!("{}{}", self.column_prefix, name))
    }
}

/// Fit loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub encoder: EncoderConfig,
    pub labels: LabelConfig,
    pub prediction: PredictionConfig,
    pub training: TrainingConfig,
    pub classifier: ClassifierConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content).map_err(|e| {
            VisError::InvalidParameters(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            VisError::InvalidParameters(format!("failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `MESHVIS_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `MESHVIS_*` overrides from an explicit set of variables.
    ///
    /// Unparseable values are rejected rather than ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "MESHVIS_EPOCHS" => self.training.epochs = parse_var(key, value)?,
                "MESHVIS_BATCH_SIZE" => self.training.batch_size = parse_var(key, value)?,
                "MESHVIS_THRESHOLD" => self.prediction.threshold = parse_var(key, value)?,
                "MESHVIS_LEARNING_RATE" => self.classifier.learning_rate = parse_var(key, value)?,
                "MESHVIS_SEED" => self.classifier.seed = parse_var(key, value)?,
                "MESHVIS_OUTPUT_PREFIX" => self.prediction.output_prefix = value.to_string(),
                _ => continue,
            }
            info!(key, value, "configuration override");
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        self.labels.validate()?;
        self.classifier.validate()?;

        if self.labels.contains(&self.encoder.connectivity_column) {
            return Err(VisError::InvalidParameters(format!(
                "'{}' cannot be both the connectivity column and a label",
                self.encoder.connectivity_column
            )));
        }
        if self.training.epochs == 0 {
            return Err(VisError::InvalidParameters("epochs must be positive".to_string()));
        }
        if self.training.batch_size == 0 {
            return Err(VisError::InvalidParameters("batch size must be positive".to_string()));
        }
        let t = self.prediction.threshold;
        if !(t > 0.0 && t < 1.0) {
            return Err(VisError::InvalidParameters(format!(
                "threshold must be in (0, 1), got {}",
                t
            )));
        }
        if self.prediction.output_prefix.is_empty() {
            return Err(VisError::InvalidParameters(
                "output prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VisError::InvalidParameters(format!("invalid value '{}' for {}", value, key)))
}
