use std::ops::Mul;
use std::rc::Rc;

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct MulScalar {
    input: Tensor,
    scalar: f32,
}

impl MulScalar {
    pub fn forward(input: Tensor, scalar: f32) -> Tensor {
        let array = &input.container.borrow().array * scalar;
        let op = MulScalar { input, scalar };
        Tensor::new_with_prev(array, Rc::new(op))
    }
}

impl Operation for MulScalar {
    fn backward(&self, output: &Tensor) {
        self.input
            .backward_internal(output_grad(output) * self.scalar);
    }

    fn zero_graph(&self, pass: usize) {
        self.input.zero_graph(pass);
    }
    fn build_graph(&self) {
        self.input.build_graph();
    }
}

impl Tensor {
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        MulScalar::forward(self.clone(), scalar)
    }
}

impl Mul<f32> for Tensor {
    type Output = Tensor;
    fn mul(self, rhs: f32) -> Tensor {
        MulScalar::forward(self, rhs)
    }
}
