use ndarray::{Array, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::random::TensorRng;
use crate::tensor::Tensor;

/// Bilinear form with a single output: `y_b = x1_b · W · x2_b + bias`.
///
/// Takes two `(batch, in1)` and `(batch, in2)` inputs and returns a `(batch,)`
/// tensor.
#[derive(Debug, Clone)]
pub struct BilinearLayer {
    weight: Tensor,
    bias: Tensor,
}

impl BilinearLayer {
    pub fn new(in1_features: usize, in2_features: usize, rng: &mut TensorRng) -> BilinearLayer {
        let bound = 1.0 / (in1_features.max(1) as f32).sqrt();
        let distribution = Uniform::new_inclusive(-bound, bound);
        let weight = Tensor::new(Array::random_using(
            IxDyn(&[in1_features, in2_features]),
            distribution,
            rng,
        ));
        let bias = Tensor::new(Array::random_using(IxDyn(&[1]), distribution, rng));
        BilinearLayer { weight, bias }
    }

    pub fn from_parts(weight: Tensor, bias: Tensor) -> BilinearLayer {
        BilinearLayer { weight, bias }
    }

    pub fn forward(&self, x1: &Tensor, x2: &Tensor) -> Tensor {
        let projected = x1.matmul(&self.weight);
        (projected * x2.clone()).sum_along(1) + self.bias.clone()
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
