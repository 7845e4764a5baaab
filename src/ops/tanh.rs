use std::rc::Rc;

use ndarray::ArrayD;

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
struct TensorTanh {
    inp: Tensor,
    output: ArrayD<f32>,
}

impl TensorTanh {
    fn forward(inp: Tensor) -> Tensor {
        let result = inp.container.borrow().array.mapv(f32::tanh);
        let node = TensorTanh {
            inp,
            output: result.clone(),
        };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorTanh {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);
        // d/dx tanh(x) = 1 - tanh(x)^2
        let local = self.output.mapv(|t| 1.0 - t * t);
        self.inp.backward_internal(grad * local);
    }

    fn zero_graph(&self, pass: usize) {
        self.inp.zero_graph(pass);
    }

    fn build_graph(&self) {
        self.inp.build_graph();
    }
}

impl Tensor {
    pub fn tanh(&self) -> Tensor {
        TensorTanh::forward(self.clone())
    }
}
