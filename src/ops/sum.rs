use std::rc::Rc;

use ndarray::{Array0, Axis};

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct Sum {
    input: Tensor,
    axis: Option<usize>,
}

impl Sum {
    pub fn forward(input: Tensor, axis: Option<usize>) -> Tensor {
        let summed = {
            let container = input.container.borrow();
            match axis {
                Some(axis) => container.array.sum_axis(Axis(axis)),
                None => Array0::from_elem((), container.array.sum()).into_dyn(),
            }
        };
        let op = Sum { input, axis };
        Tensor::new_with_prev(summed, Rc::new(op))
    }
}

impl Operation for Sum {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);
        let input_shape = self.input.shape();

        // Expand grad to input shape
        let grad = match self.axis {
            Some(axis) => grad.insert_axis(Axis(axis)),
            None => grad,
        };
        let broadcasted = grad
            .broadcast(input_shape)
            .expect("summed gradient is broadcastable to the input")
            .to_owned();

        self.input.backward_internal(broadcasted);
    }

    fn zero_graph(&self, pass: usize) {
        self.input.zero_graph(pass);
    }

    fn build_graph(&self) {
        self.input.build_graph();
    }
}

impl Tensor {
    /// Sums along `axis`, removing it.
    pub fn sum_along(&self, axis: usize) -> Tensor {
        Sum::forward(self.clone(), Some(axis))
    }

    /// Sums every element into a 0-dimensional tensor.
    pub fn sum(&self) -> Tensor {
        Sum::forward(self.clone(), None)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use crate::tensor::Tensor;

    #[test]
    fn test_sum_all() {
        let a = Tensor::new(array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
        let total = a.sum();
        assert_eq!(total.item(), Some(10.0));
        total.backward();
        assert_eq!(a.grad().unwrap(), array![[1.0, 1.0], [1.0, 1.0]].into_dyn());
    }

    #[test]
    fn test_sum_along_axis_1() {
        let a = Tensor::new(array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
        let rows = a.sum_along(1);
        assert_eq!(rows.data(), array![3.0, 7.0].into_dyn());

        let weights = Tensor::constant(array![1.0, 2.0].into_dyn());
        (rows * weights).sum().backward();
        assert_eq!(a.grad().unwrap(), array![[1.0, 1.0], [2.0, 2.0]].into_dyn());
    }
}
