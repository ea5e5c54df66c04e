//! Layers and optimizer used by the visibility classifier
//!
//! Everything operates on `f32` batches laid out row-major:
//! inputs are `(batch, width)`, convolution activations are
//! `(batch, steps, filters)`.

use ndarray::{s, Array, Array1, Array2, Array3, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

fn glorot_uniform<D: Dimension>(shape: D, fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Array<f32, D> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Array::from_shape_simple_fn(shape, || rng.gen_range(-limit..limit))
}

pub(crate) fn relu<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| v.max(0.0))
}

pub(crate) fn sigmoid(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// Zero the gradient wherever the pre-activation was not positive
fn relu_backward<D: Dimension>(grad: &mut Array<f32, D>, pre_activation: &Array<f32, D>) {
    Zip::from(grad).and(pre_activation).for_each(|g, &z| {
        if z <= 0.0 {
            *g = 0.0;
        }
    });
}

/// Adam moment estimates for one parameter tensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamMoments<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> AdamMoments<D> {
    fn zeros_like(param: &Array<f32, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    /// Both moment tensors have the shape of `param`
    fn fits(&self, param: &Array<f32, D>) -> bool {
        self.m.shape() == param.shape() && self.v.shape() == param.shape()
    }

    fn step(&mut self, param: &mut Array<f32, D>, grad: &Array<f32, D>, adam: &Adam) {
        let (b1, b2) = (adam.beta1, adam.beta2);
        let t = adam.step as i32;
        let lr_t = adam.learning_rate * (1.0 - b2.powi(t)).sqrt() / (1.0 - b1.powi(t));

        Zip::from(&mut self.m)
            .and(&mut self.v)
            .and(param)
            .and(grad)
            .for_each(|m, v, p, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + adam.epsilon);
            });
    }
}

/// Adam optimizer hyperparameters and step counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub step: u64,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
        }
    }
}

/// 1-D convolution over a single input channel, `valid` padding, stride 1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv1d {
    /// `(kernel_size, filters)`
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    w_moments: AdamMoments<ndarray::Ix2>,
    b_moments: AdamMoments<ndarray::Ix1>,
}

impl Conv1d {
    pub fn new(kernel_size: usize, filters: usize, rng: &mut StdRng) -> Self {
        let weights = glorot_uniform(ndarray::Ix2(kernel_size, filters), kernel_size, kernel_size * filters, rng);
        let bias = Array1::zeros(filters);
        Self {
            w_moments: AdamMoments::zeros_like(&weights),
            b_moments: AdamMoments::zeros_like(&bias),
            weights,
            bias,
        }
    }

    pub fn kernel_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn filters(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_steps(&self, width: usize) -> usize {
        (width + 1).saturating_sub(self.kernel_size())
    }

    /// Pre-activation output `(batch, steps, filters)`
    pub fn forward(&self, x: &Array2<f32>) -> Array3<f32> {
        let (batch, width) = x.dim();
        let k = self.kernel_size();
        let steps = self.output_steps(width);
        let mut out = Array3::zeros((batch, steps, self.filters()));
        for t in 0..steps {
            let window = x.slice(s![.., t..t + k]);
            let mut step_out = window.dot(&self.weights);
            step_out += &self.bias;
            out.slice_mut(s![.., t, ..]).assign(&step_out);
        }
        out
    }

    /// Gradients of weights and bias given the gradient of the pre-activation
    pub fn backward(&self, x: &Array2<f32>, grad: &Array3<f32>) -> (Array2<f32>, Array1<f32>) {
        let k = self.kernel_size();
        let mut d_weights = Array2::zeros(self.weights.raw_dim());
        let mut d_bias = Array1::zeros(self.bias.raw_dim());
        for t in 0..grad.len_of(Axis(1)) {
            let window = x.slice(s![.., t..t + k]);
            let g = grad.slice(s![.., t, ..]);
            d_weights += &window.t().dot(&g);
            d_bias += &g.sum_axis(Axis(0));
        }
        (d_weights, d_bias)
    }

    fn apply(&mut self, d_weights: &Array2<f32>, d_bias: &Array1<f32>, adam: &Adam) {
        self.w_moments.step(&mut self.weights, d_weights, adam);
        self.b_moments.step(&mut self.bias, d_bias, adam);
    }

    /// Optimizer state matches the parameter shapes
    pub fn moments_consistent(&self) -> bool {
        self.w_moments.fits(&self.weights) && self.b_moments.fits(&self.bias)
    }
}

/// Non-overlapping max pooling along the step axis, `valid` padding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPool1d {
    pub pool_size: usize,
}

impl MaxPool1d {
    pub fn output_steps(&self, steps: usize) -> usize {
        steps / self.pool_size
    }

    /// Pooled output plus the source step of every maximum
    pub fn forward(&self, x: &Array3<f32>) -> (Array3<f32>, Array3<usize>) {
        let (batch, steps, filters) = x.dim();
        let pooled_steps = self.output_steps(steps);
        let mut out = Array3::zeros((batch, pooled_steps, filters));
        let mut argmax = Array3::zeros((batch, pooled_steps, filters));
        for b in 0..batch {
            for p in 0..pooled_steps {
                for f in 0..filters {
                    let start = p * self.pool_size;
                    let mut best = start;
                    for t in start + 1..start + self.pool_size {
                        if x[[b, t, f]] > x[[b, best, f]] {
                            best = t;
                        }
                    }
                    out[[b, p, f]] = x[[b, best, f]];
                    argmax[[b, p, f]] = best;
                }
            }
        }
        (out, argmax)
    }

    /// Route pooled gradients back to the positions that won the max
    pub fn backward(&self, grad: &Array3<f32>, argmax: &Array3<usize>, steps: usize) -> Array3<f32> {
        let (batch, pooled_steps, filters) = grad.dim();
        let mut out = Array3::zeros((batch, steps, filters));
        for b in 0..batch {
            for p in 0..pooled_steps {
                for f in 0..filters {
                    out[[b, argmax[[b, p, f]], f]] += grad[[b, p, f]];
                }
            }
        }
        out
    }
}

/// Fully connected layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// `(inputs, units)`
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    w_moments: AdamMoments<ndarray::Ix2>,
    b_moments: AdamMoments<ndarray::Ix1>,
}

impl Dense {
    pub fn new(inputs: usize, units: usize, rng: &mut StdRng) -> Self {
        let weights = glorot_uniform(ndarray::Ix2(inputs, units), inputs, units, rng);
        let bias = Array1::zeros(units);
        Self {
            w_moments: AdamMoments::zeros_like(&weights),
            b_moments: AdamMoments::zeros_like(&bias),
            weights,
            bias,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn units(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weights) + &self.bias
    }

    /// Returns `(d_weights, d_bias, d_input)`
    pub fn backward(&self, x: &Array2<f32>, grad: &Array2<f32>) -> (Array2<f32>, Array1<f32>, Array2<f32>) {
        let d_weights = x.t().dot(grad);
        let d_bias = grad.sum_axis(Axis(0));
        let d_input = grad.dot(&self.weights.t());
        (d_weights, d_bias, d_input)
    }

    fn apply(&mut self, d_weights: &Array2<f32>, d_bias: &Array1<f32>, adam: &Adam) {
        self.w_moments.step(&mut self.weights, d_weights, adam);
        self.b_moments.step(&mut self.bias, d_bias, adam);
    }

    /// Optimizer state matches the parameter shapes
    pub fn moments_consistent(&self) -> bool {
        self.w_moments.fits(&self.weights) && self.b_moments.fits(&self.bias)
    }
}

/// Intermediate activations kept for the backward pass
pub(crate) struct ForwardCache {
    pub conv_pre: Array3<f32>,
    pub argmax: Array3<usize>,
    pub flat: Array2<f32>,
    pub hidden_pre: Array2<f32>,
    pub hidden: Array2<f32>,
    pub output: Array2<f32>,
}

/// Conv1D -> ReLU -> MaxPool -> Flatten -> Dense -> ReLU -> Dense -> sigmoid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub conv: Conv1d,
    pub pool: MaxPool1d,
    pub hidden: Dense,
    pub output: Dense,
    pub optimizer: Adam,
}

impl Network {
    pub(crate) fn forward(&self, x: &Array2<f32>) -> ForwardCache {
        let batch = x.nrows();
        let conv_pre = self.conv.forward(x);
        let conv_act = relu(&conv_pre);
        let (pooled, argmax) = self.pool.forward(&conv_act);
        let filters = pooled.len_of(Axis(2));
        let flat_len = pooled.len_of(Axis(1)) * filters;
        let flat = Array2::from_shape_fn((batch, flat_len), |(b, i)| pooled[[b, i / filters, i % filters]]);
        let hidden_pre = self.hidden.forward(&flat);
        let hidden = relu(&hidden_pre);
        let output = sigmoid(&self.output.forward(&hidden));
        ForwardCache {
            conv_pre,
            argmax,
            flat,
            hidden_pre,
            hidden,
            output,
        }
    }

    /// Backpropagate `d_logits` (gradient of the loss w.r.t. the output
    /// pre-activation) and take one Adam step
    pub(crate) fn backward_and_step(&mut self, x: &Array2<f32>, cache: &ForwardCache, d_logits: &Array2<f32>) {
        let (d_w2, d_b2, mut d_hidden) = self.output.backward(&cache.hidden, d_logits);
        relu_backward(&mut d_hidden, &cache.hidden_pre);

        let (d_w1, d_b1, d_flat) = self.hidden.backward(&cache.flat, &d_hidden);

        let (batch, pooled_steps, filters) = cache.argmax.dim();
        let d_pooled = Array3::from_shape_fn((batch, pooled_steps, filters), |(b, t, f)| {
            d_flat[[b, t * filters + f]]
        });
        let mut d_conv = self
            .pool
            .backward(&d_pooled, &cache.argmax, cache.conv_pre.len_of(Axis(1)));
        relu_backward(&mut d_conv, &cache.conv_pre);
        let (d_wc, d_bc) = self.conv.backward(x, &d_conv);

        self.optimizer.step += 1;
        let adam = self.optimizer.clone();
        self.output.apply(&d_w2, &d_b2, &adam);
        self.hidden.apply(&d_w1, &d_b1, &adam);
        self.conv.apply(&d_wc, &d_bc, &adam);
    }
}
