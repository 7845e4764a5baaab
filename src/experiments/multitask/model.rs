use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::nn::{BilinearLayer, EmbeddingBagEncoder, Encoder, LinearLayer};
use crate::random::TensorRng;
use crate::tensor::Tensor;

use super::config::{FineTuneMode, ModelConfig};

/// Parameter values by name, in the model's canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub parameters: Vec<(String, ArrayD<f32>)>,
}

/// Shared encoder with one head per task.
///
/// - sentiment: `Linear(hidden, 5)` logits
/// - paraphrase: `Bilinear(hidden, hidden, 1)` logit
/// - similarity: `Bilinear(hidden, hidden, 1)` score
///
/// Dropout is applied to the pooled representation before every head.
#[derive(Debug)]
pub struct MultitaskModel {
    encoder: Box<dyn Encoder>,
    sentiment: LinearLayer,
    paraphrase: BilinearLayer,
    similarity: BilinearLayer,
    dropout_prob: f32,
    config: ModelConfig,
}

impl MultitaskModel {
    pub fn new(config: &ModelConfig, rng: &mut TensorRng) -> Result<MultitaskModel> {
        let encoder = EmbeddingBagEncoder::new(config.vocab_size, config.hidden_size, rng)?;
        Ok(Self::with_encoder(Box::new(encoder), config, rng))
    }

    /// Builds the task heads around `encoder` and applies the fine-tune mode.
    pub fn with_encoder(
        encoder: Box<dyn Encoder>,
        config: &ModelConfig,
        rng: &mut TensorRng,
    ) -> MultitaskModel {
        let hidden = encoder.hidden_size();
        let trainable = config.fine_tune_mode == FineTuneMode::FullyTrainable;
        for param in encoder.parameters() {
            param.set_requires_grad(trainable);
        }
        MultitaskModel {
            sentiment: LinearLayer::new(hidden, config.num_labels, rng),
            paraphrase: BilinearLayer::new(hidden, hidden, rng),
            similarity: BilinearLayer::new(hidden, hidden, rng),
            dropout_prob: config.hidden_dropout_prob,
            config: config.clone(),
            encoder,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Pooled `(batch, hidden)` representation of a batch of sentences.
    pub fn forward(&self, token_ids: &Array2<usize>, attention_mask: &Array2<f32>) -> Tensor {
        self.encoder.forward(token_ids, attention_mask)
    }

    fn pooled(
        &self,
        token_ids: &Array2<usize>,
        attention_mask: &Array2<f32>,
        dropout: &mut Option<&mut TensorRng>,
    ) -> Tensor {
        self.forward(token_ids, attention_mask)
            .dropout(self.dropout_prob, dropout.as_deref_mut())
    }

    /// `(batch, 5)` sentiment logits. `dropout` is `None` in evaluation mode.
    pub fn predict_sentiment(
        &self,
        token_ids: &Array2<usize>,
        attention_mask: &Array2<f32>,
        mut dropout: Option<&mut TensorRng>,
    ) -> Tensor {
        let pooled = self.pooled(token_ids, attention_mask, &mut dropout);
        self.sentiment.forward(&pooled)
    }

    /// `(batch,)` paraphrase logits.
    pub fn predict_paraphrase(
        &self,
        token_ids_1: &Array2<usize>,
        attention_mask_1: &Array2<f32>,
        token_ids_2: &Array2<usize>,
        attention_mask_2: &Array2<f32>,
        mut dropout: Option<&mut TensorRng>,
    ) -> Tensor {
        let first = self.pooled(token_ids_1, attention_mask_1, &mut dropout);
        let second = self.pooled(token_ids_2, attention_mask_2, &mut dropout);
        self.paraphrase.forward(&first, &second)
    }

    /// `(batch,)` similarity scores.
    pub fn predict_similarity(
        &self,
        token_ids_1: &Array2<usize>,
        attention_mask_1: &Array2<f32>,
        token_ids_2: &Array2<usize>,
        attention_mask_2: &Array2<f32>,
        mut dropout: Option<&mut TensorRng>,
    ) -> Tensor {
        let first = self.pooled(token_ids_1, attention_mask_1, &mut dropout);
        let second = self.pooled(token_ids_2, attention_mask_2, &mut dropout);
        self.similarity.forward(&first, &second)
    }

    /// Every parameter, encoder first, then the sentiment, paraphrase and
    /// similarity heads.
    pub fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = self.encoder.named_parameters();
        params.extend(self.sentiment.named_parameters("sentiment"));
        params.extend(self.paraphrase.named_parameters("paraphrase"));
        params.extend(self.similarity.named_parameters("similarity"));
        params
    }

    /// Parameters the optimizer updates under the current fine-tune mode.
    pub fn trainable_parameters(&self) -> Vec<Tensor> {
        self.named_parameters()
            .into_iter()
            .map(|(_, p)| p)
            .filter(Tensor::requires_grad)
            .collect()
    }

    pub fn state(&self) -> ModelState {
        ModelState {
            parameters: self
                .named_parameters()
                .into_iter()
                .map(|(name, p)| (name, p.data()))
                .collect(),
        }
    }

    /// Copies parameter values from `state`. Names and shapes must match exactly.
    pub fn load_state(&self, state: &ModelState) -> Result<()> {
        let params = self.named_parameters();
        if params.len() != state.parameters.len() {
            return Err(TrainError::configuration(format!(
                "checkpoint holds {} parameters, model has {}",
                state.parameters.len(),
                params.len()
            )));
        }
        for ((name, param), (saved_name, saved)) in params.iter().zip(&state.parameters) {
            if name != saved_name || param.shape() != saved.shape() {
                return Err(TrainError::configuration(format!(
                    "checkpoint parameter {saved_name} {:?} does not match {name} {:?}",
                    saved.shape(),
                    param.shape()
                )));
            }
        }
        for ((_, param), (_, saved)) in params.iter().zip(&state.parameters) {
            param.update_data(saved.clone());
            param.zero_grad();
        }
        Ok(())
    }
}
