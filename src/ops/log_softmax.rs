use std::rc::Rc;

use ndarray::{ArrayD, Axis};

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

#[derive(Debug)]
struct TensorLogSoftmax {
    inp: Tensor,
    softmax: ArrayD<f32>,
}

impl TensorLogSoftmax {
    /// Applies log-softmax along the last axis, so a `(batch, classes)` input
    /// is normalized per sample.
    fn forward(inp: Tensor) -> Tensor {
        let (result, softmax) = {
            let container = inp.container.borrow();
            let inp_data = &container.array;
            let last = Axis(inp_data.ndim().saturating_sub(1));

            // For numerical stability: subtract max along last axis
            let max_vals = inp_data
                .map_axis(last, |row| {
                    row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b))
                })
                .insert_axis(last);
            let shifted = inp_data - &max_vals;
            let log_sum_exp = shifted
                .mapv(f32::exp)
                .sum_axis(last)
                .mapv(f32::ln)
                .insert_axis(last);

            let result = &shifted - &log_sum_exp;
            let softmax = result.mapv(f32::exp);
            (result, softmax)
        };

        let node = TensorLogSoftmax { inp, softmax };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for TensorLogSoftmax {
    fn backward(&self, output: &Tensor) {
        let grad_output = output_grad(output);
        let last = Axis(grad_output.ndim().saturating_sub(1));

        // grad_input = grad_output - softmax * sum(grad_output, last)
        let sum_term = grad_output.sum_axis(last).insert_axis(last);
        let grad_input = &grad_output - &(&self.softmax * &sum_term);
        self.inp.backward_internal(grad_input);
    }

    fn zero_graph(&self, pass: usize) {
        self.inp.zero_graph(pass);
    }

    fn build_graph(&self) {
        self.inp.build_graph();
    }
}

impl Tensor {
    pub fn log_softmax(&self) -> Tensor {
        TensorLogSoftmax::forward(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use crate::tensor::Tensor;

    #[test]
    fn test_log_softmax_rows_normalize() {
        let input = Tensor::constant(array![[1.0, 2.0, 3.0], [1.0, 1.0, 1.0]].into_dyn());
        let output = input.log_softmax().data();

        for row in output.outer_iter() {
            let total: f32 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
        let expected = -(3.0f32).ln();
        for val in output.index_axis(ndarray::Axis(0), 1).iter() {
            assert!((val - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_log_softmax_large_logits_are_finite() {
        let input = Tensor::constant(array![[1000.0, 0.0]].into_dyn());
        let output = input.log_softmax().data();
        assert!(output.iter().all(|v| v.is_finite()));
        assert!(output[[0, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_log_softmax_backward_picks_class() {
        // Negative log-likelihood of class 0 on uniform logits
        let input = Tensor::new(array![[0.0, 0.0]].into_dyn());
        let one_hot = Tensor::constant(array![[-1.0, 0.0]].into_dyn());
        (input.log_softmax() * one_hot).sum().backward();

        // softmax - one_hot
        let grad = input.grad().unwrap();
        assert!((grad[[0, 0]] + 0.5).abs() < 1e-6);
        assert!((grad[[0, 1]] - 0.5).abs() < 1e-6);
    }
}
