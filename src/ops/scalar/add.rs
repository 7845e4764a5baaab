use std::ops::Add;
use std::rc::Rc;

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct AddScalar {
    input: Tensor,
}

impl AddScalar {
    pub fn forward(input: Tensor, scalar: f32) -> Tensor {
        let array = &input.container.borrow().array + scalar;
        let op = AddScalar { input };
        Tensor::new_with_prev(array, Rc::new(op))
    }
}

impl Operation for AddScalar {
    fn backward(&self, output: &Tensor) {
        self.input.backward_internal(output_grad(output));
    }

    fn zero_graph(&self, pass: usize) {
        self.input.zero_graph(pass);
    }
    fn build_graph(&self) {
        self.input.build_graph();
    }
}

impl Tensor {
    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        AddScalar::forward(self.clone(), scalar)
    }
}

impl Add<f32> for Tensor {
    type Output = Tensor;
    fn add(self, rhs: f32) -> Tensor {
        AddScalar::forward(self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use crate::tensor::Tensor;

    #[test]
    fn test_add_scalar() {
        let a = Tensor::new(array![1.0, 2.0].into_dyn());
        let b = a.clone() + 1.5;
        assert_eq!(b.data(), array![2.5, 3.5].into_dyn());
        b.sum().backward();
        assert_eq!(a.grad().unwrap(), array![1.0, 1.0].into_dyn());
    }
}
