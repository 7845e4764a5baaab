use std::rc::Rc;

use ndarray::ArrayD;

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
struct TensorSigmoid {
    inp: Tensor,
    output: ArrayD<f32>,
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl TensorSigmoid {
    fn forward(inp: Tensor) -> Tensor {
        let result = inp.container.borrow().array.mapv(sigmoid);
        let node = TensorSigmoid {
            inp,
            output: result.clone(),
        };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorSigmoid {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output);
        // s'(x) = s(x) * (1 - s(x))
        let local = self.output.mapv(|s| s * (1.0 - s));
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
    pub fn sigmoid(&self) -> Tensor {
        TensorSigmoid::forward(self.clone())
    }
}
