//! Multi-label visibility classifier
//!
//! Three independent sigmoid outputs (`is_visible`, `behind_a_mesh`,
//! `out_of_frame`) trained jointly with binary cross-entropy. The network is
//! a single-channel Conv1D over the scaled feature row, max pooling, one
//! hidden dense layer and the sigmoid head.

pub mod layers;

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{Result, VisError};
use layers::{Adam, Conv1d, Dense, MaxPool1d, Network};

/// Number of independent outputs
pub const OUTPUTS: usize = 3;

/// Probability above which an output is predicted `true`
pub const DEFAULT_THRESHOLD: f32 = 0.5;

const LOSS_CLIP: f32 = 1e-7;

/// Network shape and optimizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub filters: usize,
    pub kernel_size: usize,
    pub pool_size: usize,
    pub hidden: usize,
    pub learning_rate: f32,
    /// Seed for weight initialization and per-epoch shuffling
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            filters: 64,
            kernel_size: 2,
            pool_size: 2,
            hidden: 50,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if self.filters == 0 || self.kernel_size == 0 || self.pool_size == 0 || self.hidden == 0 {
            return Err(VisError::InvalidParameters(
                "filters, kernel_size, pool_size and hidden must be positive".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(VisError::InvalidParameters(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    /// Width of the flattened pooled activations for a given input width
    fn flattened_width(&self, input_width: usize) -> usize {
        let steps = (input_width + 1).saturating_sub(self.kernel_size);
        (steps / self.pool_size) * self.filters
    }
}

/// Mean training loss per epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitHistory {
    pub losses: Vec<f32>,
}

impl FitHistory {
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

/// Thresholded output for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub is_visible: bool,
    pub behind_a_mesh: bool,
    pub out_of_frame: bool,
}

impl Prediction {
    pub fn as_array(&self) -> [bool; 3] {
        [self.is_visible, self.behind_a_mesh, self.out_of_frame]
    }
}

/// Map each probability to `p > threshold`
pub fn threshold(probabilities: &Array2<f32>, threshold: f32) -> Vec<Prediction> {
    probabilities
        .axis_iter(Axis(0))
        .map(|row| Prediction {
            is_visible: row[0] > threshold,
            behind_a_mesh: row[1] > threshold,
            out_of_frame: row[2] > threshold,
        })
        .collect()
}

/// Mean binary cross-entropy over every output of every row
pub fn binary_cross_entropy(probabilities: &Array2<f32>, targets: &Array2<f32>) -> f32 {
    let n = probabilities.len().max(1) as f32;
    let total: f32 = probabilities
        .iter()
        .zip(targets.iter())
        .map(|(&p, &y)| {
            let p = p.clamp(LOSS_CLIP, 1.0 - LOSS_CLIP);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / n
}

/// Trainable classifier with its optimizer state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityClassifier {
    input_width: usize,
    config: ClassifierConfig,
    network: Network,
    epochs_trained: usize,
}

impl VisibilityClassifier {
    /// Build a freshly initialized classifier for rows of `input_width` features
    pub fn new(input_width: usize, config: ClassifierConfig) -> Result<Self> {
        config.validate()?;
        if config.flattened_width(input_width) == 0 {
            return Err(VisError::InvalidParameters(format!(
                "input width {} too small for kernel {} and pool {}",
                input_width, config.kernel_size, config.pool_size
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let conv = Conv1d::new(config.kernel_size, config.filters, &mut rng);
        let hidden = Dense::new(config.flattened_width(input_width), config.hidden, &mut rng);
        let output = Dense::new(config.hidden, OUTPUTS, &mut rng);

        debug!(
            input_width,
            filters = config.filters,
            hidden = config.hidden,
            "initialized visibility classifier"
        );

        Ok(Self {
            input_width,
            network: Network {
                conv,
                pool: MaxPool1d {
                    pool_size: config.pool_size,
                },
                hidden,
                output,
                optimizer: Adam::new(config.learning_rate),
            },
            config,
            epochs_trained: 0,
        })
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    /// Check that deserialized parameters agree with the declared shape
    pub fn validate(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| VisError::Artifact(e.to_string()))?;
        let net = &self.network;
        let expected_flat = self.config.flattened_width(self.input_width);
        let consistent = net.conv.kernel_size() == self.config.kernel_size
            && net.conv.filters() == self.config.filters
            && net.conv.bias.len() == self.config.filters
            && net.pool.pool_size == self.config.pool_size
            && net.hidden.inputs() == expected_flat
            && net.hidden.units() == self.config.hidden
            && net.hidden.bias.len() == self.config.hidden
            && net.output.inputs() == self.config.hidden
            && net.output.units() == OUTPUTS
            && net.output.bias.len() == OUTPUTS
            && net.conv.moments_consistent()
            && net.hidden.moments_consistent()
            && net.output.moments_consistent();
        if !consistent || expected_flat == 0 {
            return Err(VisError::Artifact(format!(
                "classifier parameters do not match an input width of {}",
                self.input_width
            )));
        }
        Ok(())
    }

    fn check_width(&self, x: &Array2<f32>) -> Result<()> {
        if x.ncols() != self.input_width {
            return Err(VisError::Schema(format!(
                "classifier expects {} features, got {}",
                self.input_width,
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Fit (or continue fitting) on `x` against the `(rows, 3)` targets `y`
    pub fn fit(&mut self, x: &Array2<f32>, y: &Array2<f32>, epochs: usize, batch_size: usize) -> Result<FitHistory> {
        self.check_width(x)?;
        if y.dim() != (x.nrows(), OUTPUTS) {
            return Err(VisError::Schema(format!(
                "targets must be {}x{}, got {}x{}",
                x.nrows(),
                OUTPUTS,
                y.nrows(),
                y.ncols()
            )));
        }
        if x.nrows() == 0 {
            return Err(VisError::InvalidParameters("cannot fit on zero rows".to_string()));
        }
        if batch_size == 0 {
            return Err(VisError::InvalidParameters("batch size must be positive".to_string()));
        }

        let mut history = FitHistory::default();
        let mut order: Vec<usize> = (0..x.nrows()).collect();

        for _ in 0..epochs {
            let epoch = self.epochs_trained;
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64 + 1));
            order.shuffle(&mut rng);

            let mut loss_sum = 0.0f32;
            for batch in order.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);

                let cache = self.network.forward(&xb);
                loss_sum += binary_cross_entropy(&cache.output, &yb) * batch.len() as f32;

                let scale = (batch.len() * OUTPUTS) as f32;
                let d_logits = (&cache.output - &yb) / scale;
                self.network.backward_and_step(&xb, &cache, &d_logits);
            }

            let epoch_loss = loss_sum / x.nrows() as f32;
            self.epochs_trained += 1;
            history.losses.push(epoch_loss);
            info!(epoch = self.epochs_trained, loss = epoch_loss, "epoch complete");
        }

        Ok(history)
    }

    /// `(rows, 3)` independent probabilities
    pub fn predict_proba(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_width(x)?;
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, OUTPUTS)));
        }
        Ok(self.network.forward(x).output)
    }

    /// Probabilities thresholded into predictions
    pub fn predict(&self, x: &Array2<f32>, cutoff: f32) -> Result<Vec<Prediction>> {
        Ok(threshold(&self.predict_proba(x)?, cutoff))
    }
}
