//! Mesh visibility trainer and batch predictor
//!
//! Loads vertex observation CSVs, fits the scaler and classifier from
//! `meshvis-core`, persists both artifacts and applies them to new files.

pub mod dataset;
pub mod errors;
pub mod predictor;
pub mod trainer;

use meshvis_core::{ArtifactPaths, PipelineConfig};
use std::path::Path;

pub use dataset::{list_csv_files, CsvTable, TrainingSet};
pub use errors::TrainerError;
pub use predictor::{BatchReport, ErrorPolicy, FileFailure, Predictor};
pub use trainer::{TrainMode, Trainer, TrainerStage, TrainingReport};

/// Train on every CSV in `input_dir` and write artifacts into `artifacts_dir`.
pub fn train_from_dir(
    input_dir: &Path,
    artifacts_dir: &Path,
    config: PipelineConfig,
    mode: TrainMode,
) -> Result<TrainingReport, TrainerError> {
    Trainer::new(config, mode).run(input_dir, &ArtifactPaths::new(artifacts_dir))
}

/// Predict every CSV in `input_dir` with the artifacts in `artifacts_dir`.
pub fn predict_dir(
    input_dir: &Path,
    artifacts_dir: &Path,
    config: PipelineConfig,
    policy: ErrorPolicy,
) -> Result<BatchReport, TrainerError> {
    Predictor::load(&ArtifactPaths::new(artifacts_dir), config)?.predict_dir(input_dir, policy)
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
