use std::{ops::Neg, rc::Rc};

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct TensorNeg {
    tensor: Tensor,
}

impl TensorNeg {
    fn forward(tensor: Tensor) -> Tensor {
        let result = -tensor.data();
        let node = TensorNeg { tensor };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorNeg {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);
        self.tensor.backward_internal(-grad);
    }

    fn zero_graph(&self, pass: usize) {
        self.tensor.zero_graph(pass);
    }

    fn build_graph(&self) {
        self.tensor.build_graph();
    }
}

impl Neg for Tensor {
    type Output = Tensor;
    fn neg(self) -> Self::Output {
        TensorNeg::forward(self)
    }
}
