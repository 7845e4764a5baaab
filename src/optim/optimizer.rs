use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tensor::Tensor;

/// A first-order optimizer over a fixed, ordered parameter list.
///
/// The order of `parameters` is the canonical order used everywhere gradients
/// are flattened or serialized.
pub trait Optimizer {
    /// Updates every parameter holding a gradient. Parameters without a
    /// gradient are left untouched.
    fn step(&mut self);
    fn zero_grad(&self);
    fn parameters(&self) -> &[Tensor];
    fn learning_rate(&self) -> f32;
    fn state(&self) -> OptimizerState;
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// Serializable internal state of an optimizer, as stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizerState {
    Sgd,
    Adam {
        t: u32,
        current_beta1: f32,
        current_beta2: f32,
        m: Vec<ArrayD<f32>>,
        v: Vec<ArrayD<f32>>,
    },
}
