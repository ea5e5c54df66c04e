use meshvis_core::VisError;
use std::path::Path;
use thiserror::Error;

/// Errors returned by the trainer and the batch predictor.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error(transparent)]
    Core(#[from] VisError),

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("no CSV files found in {0}")]
    NoInputFiles(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainerError {
    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.display().to_string(),
            source,
        }
    }

    /// True for missing/unknown columns and width mismatches
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Core(VisError::Schema(_)))
    }

    /// True for cells that could not be encoded
    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Core(VisError::Encoding(_)))
    }

    /// True for missing or corrupt artifacts
    pub fn is_artifact(&self) -> bool {
        matches!(self, Self::Core(VisError::Artifact(_)))
    }
}

pub type Result<T> = std::result::Result<T, TrainerError>;
