use std::fmt::Debug;

use ndarray::{Array2, IxDyn};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

use crate::error::{Result, TrainError};
use crate::nn::LinearLayer;
use crate::random::TensorRng;
use crate::tensor::Tensor;

/// Sentence encoder shared by every task head.
pub trait Encoder: Debug {
    fn hidden_size(&self) -> usize;

    /// Pools `(batch, seq)` token ids into a `(batch, hidden)` representation.
    fn forward(&self, token_ids: &Array2<usize>, attention_mask: &Array2<f32>) -> Tensor;

    /// Parameters in a fixed order, keyed by stable names.
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    fn parameters(&self) -> Vec<Tensor> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }
}

/// Masked mean of token embeddings followed by a `tanh` pooler.
#[derive(Debug, Clone)]
pub struct EmbeddingBagEncoder {
    embeddings: Tensor,
    pooler: LinearLayer,
}

impl EmbeddingBagEncoder {
    pub fn new(vocab_size: usize, hidden_size: usize, rng: &mut TensorRng) -> Result<Self> {
        if vocab_size == 0 || hidden_size == 0 {
            return Err(TrainError::configuration(
                "encoder needs a non-empty vocabulary and hidden size",
            ));
        }
        let distribution = Normal::new(0.0, 0.02)
            .map_err(|e| TrainError::configuration(format!("embedding init: {e}")))?;
        let embeddings = Tensor::new(ndarray::Array::random_using(
            IxDyn(&[vocab_size, hidden_size]),
            distribution,
            rng,
        ));
        let pooler = LinearLayer::new(hidden_size, hidden_size, rng);
        Ok(EmbeddingBagEncoder { embeddings, pooler })
    }

    pub fn vocab_size(&self) -> usize {
        self.embeddings.shape()[0]
    }
}

impl Encoder for EmbeddingBagEncoder {
    fn hidden_size(&self) -> usize {
        self.embeddings.shape()[1]
    }

    fn forward(&self, token_ids: &Array2<usize>, attention_mask: &Array2<f32>) -> Tensor {
        let bag = self.embeddings.embedding_bag(token_ids, attention_mask);
        self.pooler.forward(&bag).tanh()
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = vec![("encoder.embeddings".to_string(), self.embeddings.clone())];
        params.extend(self.pooler.named_parameters("encoder.pooler"));
        params
    }
}
