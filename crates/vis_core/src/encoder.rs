//! Fixed-width connectivity encoding
//!
//! Turns the whitespace-separated list of connected vertex ids stored in a
//! single CSV cell into exactly `width` positional fields. Short lists are
//! padded with a sentinel, long lists are truncated. Tokens are opaque at
//! this stage; numeric casting happens when the feature matrix is built.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, VisError};

/// Default number of positional vertex fields
pub const DEFAULT_WIDTH: usize = 30;

/// Default sentinel for "no vertex at this position"
pub const DEFAULT_PAD_VALUE: &str = "-1";

/// Default name of the connectivity column
pub const DEFAULT_CONNECTIVITY_COLUMN: &str = "Connected_Vertices";

/// Prefix of the encoded positional columns (`Vertex_0`, `Vertex_1`, ...)
pub const VERTEX_COLUMN_PREFIX: &str = "Vertex_";

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Source column holding the whitespace-separated vertex list
    pub connectivity_column: String,
    /// Number of positional fields produced per record
    pub width: usize,
    /// Value written into positions past the end of the source list
    pub pad_value: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            connectivity_column: DEFAULT_CONNECTIVITY_COLUMN.to_string(),
            width: DEFAULT_WIDTH,
            pad_value: DEFAULT_PAD_VALUE.to_string(),
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(VisError::InvalidParameters(
                "encoder width must be positive".to_string(),
            ));
        }
        if self.connectivity_column.trim().is_empty() {
            return Err(VisError::InvalidParameters(
                "connectivity column name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Encode one raw connectivity cell with this configuration
    pub fn encode_field(&self, field: &str) -> Vec<String> {
        encode(&split_connectivity(field), self.width, &self.pad_value)
    }
}

/// Split a raw connectivity cell into tokens.
///
/// Any run of whitespace separates tokens and empty tokens are never
/// produced, so a blank cell yields an empty list.
pub fn split_connectivity(field: &str) -> Vec<&str> {
    field.split_whitespace().collect()
}

/// Encode a token list into exactly `width` values.
///
/// The first `width` tokens are kept in their original order; missing
/// positions are filled with `pad_value`. Tokens are never reordered,
/// deduplicated or inspected.
pub fn encode<S: AsRef<str>>(tokens: &[S], width: usize, pad_value: &str) -> Vec<String> {
    let mut encoded: Vec<String> = tokens
        .iter()
        .take(width)
        .map(|token| token.as_ref().to_string())
        .collect();
    encoded.resize(width, pad_value.to_string());
    encoded
}

/// `Vertex_0 .. Vertex_{width-1}`
pub fn vertex_column_names(width: usize) -> Vec<String> {
    (0..width)
        .map(|i| format!("{}{}", VERTEX_COLUMN_PREFIX, i))
        .collect()
}
