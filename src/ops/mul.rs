use std::ops::Mul;
use std::rc::Rc;

use crate::ops::{output_grad, reduce_to_shape, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
struct TensorMul {
    lhs: Tensor,
    rhs: Tensor,
}

impl TensorMul {
    fn forward(lhs: Tensor, rhs: Tensor) -> Tensor {
        let result = &lhs.container.borrow().array * &rhs.container.borrow().array;
        let node = TensorMul { lhs, rhs };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorMul {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);

        let lhs_val = self.lhs.data();
        let rhs_val = self.rhs.data();

        let grad_a = reduce_to_shape(&grad * &rhs_val, &self.lhs.shape());
        let grad_b = reduce_to_shape(&grad * &lhs_val, &self.rhs.shape());

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

impl Mul<Tensor> for Tensor {
    type Output = Tensor;

    fn mul(self, other: Tensor) -> Self::Output {
        TensorMul::forward(self, other)
    }
}
