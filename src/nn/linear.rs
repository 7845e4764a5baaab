use ndarray::{Array, IxDyn};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;

use crate::random::TensorRng;
use crate::tensor::Tensor;

/// Fully connected layer `y = x·W + b` over `(batch, in_features)` inputs.
#[derive(Debug, Clone)]
pub struct LinearLayer {
    weight: Tensor,
    bias: Tensor,
}

impl LinearLayer {
    /// Kaiming-normal weights, zero bias.
    pub fn new(in_features: usize, out_features: usize, rng: &mut TensorRng) -> LinearLayer {
        let std = (2.0 / in_features.max(1) as f32).sqrt();
        let weight = Tensor::new(
            Array::random_using(IxDyn(&[in_features, out_features]), StandardNormal, rng) * std,
        );
        let bias = Tensor::zeros(&[out_features]);
        LinearLayer { weight, bias }
    }

    pub fn from_parts(weight: Tensor, bias: Tensor) -> LinearLayer {
        LinearLayer { weight, bias }
    }

    pub fn forward(&self, x: &Tensor) -> Tensor {
        x.matmul(&self.weight) + self.bias.clone()
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    pub fn named_parameters(&self, prefix: &str) -> Vec<(String, Tensor)> {
        vec![
            (format!("{prefix}.weight"), self.weight.clone()),
            (format!("{prefix}.bias"), self.bias.clone()),
        ]
    }
}
