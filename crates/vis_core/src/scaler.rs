//! Per-column standardization (zero mean, unit variance)

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, VisError};

/// Fitted location/scale parameters, one pair per feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
    pub samples_seen: usize,
}

impl StandardScaler {
    /// Fit on the full training matrix.
    ///
    /// Uses the population variance. Constant columns keep a scale of 1.0 so
    /// they transform to zero.
    pub fn fit(matrix: &Array2<f64>) -> Result<Self> {
        let (rows, cols) = matrix.dim();
        if rows == 0 || cols == 0 {
            return Err(VisError::InvalidParameters(format!(
                "cannot fit scaler on a {}x{} matrix",
                rows, cols
            )));
        }

        let mean = matrix
            .mean_axis(Axis(0))
            .ok_or_else(|| VisError::InvalidParameters("empty matrix".to_string()))?;
        let scale = matrix
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        tracing::debug!(rows, cols, "fitted standard scaler");

        Ok(Self {
            mean,
            scale,
            samples_seen: rows,
        })
    }

    /// Number of columns the scaler was fit on
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardize `matrix` with the fitted parameters
    pub fn transform(&self, matrix: &Array2<f64>) -> Result<Array2<f64>> {
        if matrix.ncols() != self.n_features() {
            return Err(VisError::Schema(format!(
                "scaler fitted on {} columns, got {}",
                self.n_features(),
                matrix.ncols()
            )));
        }
        Ok((matrix - &self.mean) / &self.scale)
    }

    /// Fit and transform in one step
    pub fn fit_transform(matrix: &Array2<f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Self::fit(matrix)?;
        let scaled = scaler.transform(matrix)?;
        Ok((scaler, scaled))
    }

    /// Reject parameter vectors that could not have come from `fit`
    pub fn validate(&self) -> Result<()> {
        if self.mean.len() != self.scale.len() {
            return Err(VisError::Artifact(format!(
                "scaler mean has {} entries but scale has {}",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s <= 0.0)
            || self.mean.iter().any(|m| !m.is_finite())
        {
            return Err(VisError::Artifact(
                "scaler parameters must be finite with positive scale".to_string(),
            ));
        }
        Ok(())
    }
}
