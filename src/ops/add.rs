use std::ops::Add;
use std::rc::Rc;

use crate::ops::{output_grad, reduce_to_shape, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
struct TensorAdd {
    lhs: Tensor,
    rhs: Tensor,
}

impl TensorAdd {
    fn forward(lhs: Tensor, rhs: Tensor) -> Tensor {
        let result = &lhs.container.borrow().array + &rhs.container.borrow().array;
        let node = TensorAdd { lhs, rhs };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorAdd {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);
        let grad_a = reduce_to_shape(grad.clone(), &self.lhs.shape());
        let grad_b = reduce_to_shape(grad, &self.rhs.shape());
        self.lhs.backward_internal(grad_a);
        self.rhs.backward_internal(grad_b);
    }

    fn zero_graph(&self, pass: usize) {
        self.lhs.zero_graph(pass);
        self.rhs.zero_graph(pass);
    }

    fn build_graph(&self) {
        self.lhs.build_graph();
        self.rhs.build_graph();
    }
}

impl Add<Tensor> for Tensor {
    type Output = Tensor;

    fn add(self, other: Tensor) -> Self::Output {
        TensorAdd::forward(self, other)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use crate::tensor::Tensor;

    #[test]
    fn test_add_forward_backward() {
        let a = Tensor::new(array![1.0, 2.0, 3.0].into_dyn());
        let b = Tensor::new(array![4.0, 5.0, 6.0].into_dyn());
        let c = a.clone() + b.clone();
        assert_eq!(c.data(), array![5.0, 7.0, 9.0].into_dyn());

        c.backward();
        assert_eq!(a.grad().unwrap(), array![1.0, 1.0, 1.0].into_dyn());
        assert_eq!(b.grad().unwrap(), array![1.0, 1.0, 1.0].into_dyn());
    }

    #[test]
    fn test_broadcast_add_bias() {
        let x = Tensor::new(array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
        let bias = Tensor::new(array![10.0, 20.0].into_dyn());
        let y = x.clone() + bias.clone();
        assert_eq!(y.data(), array![[11.0, 22.0], [13.0, 24.0]].into_dyn());

        y.backward();
        // the bias was used once per row
        assert_eq!(bias.grad().unwrap(), array![2.0, 2.0].into_dyn());
        assert_eq!(x.grad().unwrap(), array![[1.0, 1.0], [1.0, 1.0]].into_dyn());
    }
}
