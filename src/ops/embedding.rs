use std::rc::Rc;

use ndarray::{Array2, ArrayD, Axis, Ix2};

use crate::ops::{output_grad, Operation};
use crate::tensor::Tensor;

/// Masked mean of embedding rows: `out[b] = Σ_t mask[b,t]·W[ids[b,t]] / Σ_t mask[b,t]`.
#[derive(Debug)]
struct EmbeddingBag {
    weight: Tensor,
    token_ids: Array2<usize>,
    /// Per-token weight `mask[b,t] / Σ_t mask[b,t]`.
    coefficients: Array2<f32>,
}

impl EmbeddingBag {
    fn forward(weight: Tensor, token_ids: &Array2<usize>, attention_mask: &Array2<f32>) -> Tensor {
        let denominators = attention_mask
            .sum_axis(Axis(1))
            .mapv(|d| if d > 0.0 { d } else { 1.0 });
        let coefficients = attention_mask / &denominators.insert_axis(Axis(1));

        let result = {
            let container = weight.container.borrow();
            let table = container
                .array
                .view()
                .into_dimensionality::<Ix2>()
                .expect("embedding table is 2-D");
            let (vocab, hidden) = table.dim();
            let mut pooled = Array2::<f32>::zeros((token_ids.nrows(), hidden));
            for ((b, t), &id) in token_ids.indexed_iter() {
                let c = coefficients[[b, t]];
                if c == 0.0 {
                    continue;
                }
                assert!(id < vocab, "token id {id} outside a vocabulary of {vocab}");
                pooled
                    .row_mut(b)
                    .scaled_add(c, &table.row(id));
            }
            pooled.into_dyn()
        };

        let node = EmbeddingBag {
            weight,
            token_ids: token_ids.clone(),
            coefficients,
        };
        Tensor::new_with_prev(result, Rc::new(node))
    }
}

impl Operation for EmbeddingBag {
    fn backward(&self, output: &Tensor) {
        let grad = output_grad(output)
            .into_dimensionality::<Ix2>()
            .expect("pooled gradient is 2-D");
        let mut grad_table = ArrayD::<f32>::zeros(self.weight.shape())
            .into_dimensionality::<Ix2>()
            .expect("embedding table is 2-D");

        // scatter-add back into the rows that were gathered
        for ((b, t), &id) in self.token_ids.indexed_iter() {
            let c = self.coefficients[[b, t]];
            if c != 0.0 {
                grad_table.row_mut(id).scaled_add(c, &grad.row(b));
            }
        }
        self.weight.backward_internal(grad_table.into_dyn());
    }

    fn zero_graph(&self, pass: usize) {
        self.weight.zero_graph(pass);
    }

    fn build_graph(&self) {
        self.weight.build_graph();
    }
}

impl Tensor {
    /// Looks up `token_ids` in this `(vocab, hidden)` table and averages the rows
    /// of each sequence over the positions where `attention_mask` is non-zero.
    pub fn embedding_bag(&self, token_ids: &Array2<usize>, attention_mask: &Array2<f32>) -> Tensor {
        EmbeddingBag::forward(self.clone(), token_ids, attention_mask)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use crate::tensor::Tensor;

    #[test]
    fn test_embedding_bag_masked_mean() {
        let table = Tensor::new(array![[0.0, 0.0], [1.0, 2.0], [3.0, 4.0]].into_dyn());
        let ids = array![[1, 2, 0], [2, 0, 0]];
        let mask = array![[1.0, 1.0, 0.0], [1.0, 0.0, 0.0]];

        let pooled = table.embedding_bag(&ids, &mask);
        assert_eq!(pooled.data(), array![[2.0, 3.0], [3.0, 4.0]].into_dyn());
    }

    #[test]
    fn test_embedding_bag_backward_scatters() {
        let table = Tensor::new(array![[0.0, 0.0], [1.0, 2.0], [3.0, 4.0]].into_dyn());
        let ids = array![[1, 2, 0], [2, 0, 0]];
        let mask = array![[1.0, 1.0, 0.0], [1.0, 0.0, 0.0]];

        table.embedding_bag(&ids, &mask).sum().backward();
        // padding row untouched, row 2 used by both sequences
        assert_eq!(
            table.grad().unwrap(),
            array![[0.0, 0.0], [0.5, 0.5], [1.5, 1.5]].into_dyn()
        );
    }

    #[test]
    fn test_embedding_bag_empty_sequence_is_zero() {
        let table = Tensor::new(array![[1.0], [2.0]].into_dyn());
        let pooled = table.embedding_bag(&array![[1, 1]], &array![[0.0, 0.0]]);
        assert_eq!(pooled.data(), array![[0.0]].into_dyn());
    }
}
