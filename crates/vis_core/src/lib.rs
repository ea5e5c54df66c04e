//! Mesh vertex visibility core
//!
//! Fixed-width connectivity encoding, feature assembly, standardization and
//! multi-label classification shared by the trainer and the predictor.
//!
//! Modules:
//! - `encoder`: fixed-width connectivity encoder
//! - `features`: feature schema, label parsing and record assembly
//! - `scaler`: per-column standardization
//! - `classifier`: Conv1D/Dense multi-label classifier and thresholding
//! - `artifacts`: persisted scaler/model artifacts with integrity hashes
//! - `config`: pipeline configuration
//! - `serialization`: canonical JSON helpers

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod features;
pub mod scaler;
pub mod serialization;

pub use artifacts::{load_artifacts, ArtifactPaths, ModelArtifact, ScalerArtifact};
pub use classifier::{threshold, ClassifierConfig, FitHistory, Prediction, VisibilityClassifier};
pub use config::{PipelineConfig, PredictionConfig, TrainingConfig};
pub use encoder::{encode, split_connectivity, vertex_column_names, EncoderConfig};
pub use errors::{Result, VisError};
pub use features::{assemble, FeatureRow, FeatureSchema, LabelConfig, LabelMode, LabelRow, RecordLayout};
pub use scaler::StandardScaler;

/// Crate version string recorded in logs and reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
