use crate::tensor::Tensor;

impl Tensor {
    /// Mean over every element, as a 0-dimensional tensor.
    pub fn mean(&self) -> Tensor {
        let numel = self.len().max(1) as f32;
        self.sum().mul_scalar(1.0 / numel)
    }
}
