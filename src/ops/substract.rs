use std::ops::Sub;
use std::rc::Rc;

use crate::ops::{output_grad, reduce_to_shape, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
struct TensorSub {
    lhs: Tensor,
    rhs: Tensor,
}

impl TensorSub {
    fn forward(lhs: Tensor, rhs: Tensor) -> Tensor {
        let result = &lhs.container.borrow().array - &rhs.container.borrow().array;
        let node = TensorSub { lhs, rhs };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorSub {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);
        let grad_a = reduce_to_shape(grad.clone(), &self.lhs.shape());
        let grad_b = reduce_to_shape(-grad, &self.rhs.shape());
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

impl Sub<Tensor> for Tensor {
    type Output = Tensor;

    fn sub(self, other: Tensor) -> Self::Output {
        TensorSub::forward(self, other)
    }
}
