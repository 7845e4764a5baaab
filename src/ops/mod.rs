pub mod add;
pub mod broadcast;
pub mod dropout;
pub mod embedding;
pub mod log;
pub mod log_softmax;
pub mod matmul;
pub mod mean;
pub mod mul;
pub mod negate;
pub mod scalar;
pub mod sigmoid;
pub mod substract;
pub mod sum;
pub mod tanh;

pub use broadcast::reduce_to_shape;

use crate::tensor::Tensor;

/// Backward rule of one graph node.
///
/// `backward` is called exactly once per pass, after every consumer of
/// `output` has delivered its gradient. `zero_graph` and `build_graph` forward
/// the traversal to the inputs of the node.
pub trait Operation: std::fmt::Debug {
    fn backward(&self, output: &Tensor);
    fn zero_graph(&self, pass: usize);
    fn build_graph(&self);
}

/// Gradient delivered to `output`, or zeros when nothing reached it.
pub(crate) fn output_grad(output: &Tensor) -> ndarray::ArrayD<f32> {
    output
        .grad()
        .unwrap_or_else(|| ndarray::Array::zeros(output.shape()))
}
