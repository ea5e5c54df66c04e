//! Error types for the meshvis core

use thiserror::Error;

/// Errors that can occur while encoding, scaling or classifying vertex data
#[derive(Error, Debug)]
pub enum VisError {
    /// Missing column, unknown column, or a width that disagrees with the fitted state
    #[error("Schema error: {0}")]
    Schema(String),

    /// A cell could not be turned into a feature or label value
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Scaler or model artifact missing, corrupt or inconsistent
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Invalid configuration or model parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for meshvis core operations
pub type Result<T> = std::result::Result<T, VisError>;
