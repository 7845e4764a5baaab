use ndarray::{ArrayD, ArrayView2, Ix2};
use std::rc::Rc;

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

fn as_matrix(array: &ArrayD<f32>) -> ArrayView2<'_, f32> {
    array
        .view()
        .into_dimensionality::<Ix2>()
        .expect("matmul expects 2-D operands")
}

#[derive(Debug)]
pub struct TensorMatMul {
    pub lhs: Tensor,
    pub rhs: Tensor,
}

impl TensorMatMul {
    fn forward(lhs: Tensor, rhs: Tensor) -> Tensor {
        let result = {
            let lhs_data = lhs.container.borrow();
            let rhs_data = rhs.container.borrow();
            as_matrix(&lhs_data.array)
                .dot(&as_matrix(&rhs_data.array))
                .into_dyn()
        };
        let node = TensorMatMul { lhs, rhs };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorMatMul {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);
        let grad = as_matrix(&grad);

        let input_lhs = self.lhs.data();
        let input_rhs = self.rhs.data();

        // C = A @ B
        // dL/dA = (dL/dC) @ B^T
        // dL/dB = A^T @ (dL/dC)
        let grad_lhs = grad.dot(&as_matrix(&input_rhs).t()).into_dyn();
        let grad_rhs = as_matrix(&input_lhs).t().dot(&grad).into_dyn();

        self.lhs.backward_internal(grad_lhs);
        self.rhs.backward_internal(grad_rhs);
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

impl Tensor {
    pub fn matmul(&self, rhs: &Tensor) -> Tensor {
        TensorMatMul::forward(self.clone(), rhs.clone())
    }
}
