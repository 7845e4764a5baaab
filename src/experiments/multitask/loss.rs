use ndarray::{Array1, Array2};

use crate::tensor::Tensor;

/// Keeps `ln` finite when a sigmoid saturates at exactly 0 or 1.
const LOG_EPSILON: f32 = 1e-12;

/// Cross-entropy of `(batch, classes)` logits, summed and divided by the
/// configured batch size.
pub fn sentiment_loss(logits: &Tensor, labels: &[usize], batch_size: usize) -> Tensor {
    let classes = logits.shape()[1];
    let mut negative_one_hot = Array2::<f32>::zeros((labels.len(), classes));
    for (row, &label) in labels.iter().enumerate() {
        negative_one_hot[[row, label]] = -1.0;
    }
    (logits.log_softmax() * Tensor::constant(negative_one_hot.into_dyn()))
        .sum()
        .mul_scalar(1.0 / batch_size as f32)
}

/// Binary cross-entropy on the sigmoid of `(batch,)` logits against 0/1 labels.
pub fn paraphrase_loss(logits: &Tensor, labels: &[f32], batch_size: usize) -> Tensor {
    let targets = Array1::from_vec(labels.to_vec());
    let complements = targets.mapv(|y| 1.0 - y);

    let probabilities = logits.sigmoid();
    let log_p = probabilities.add_scalar(LOG_EPSILON).log();
    let log_not_p = (-probabilities.clone())
        .add_scalar(1.0)
        .add_scalar(LOG_EPSILON)
        .log();

    let log_likelihood = log_p * Tensor::constant(targets.into_dyn())
        + log_not_p * Tensor::constant(complements.into_dyn());
    log_likelihood.sum().mul_scalar(-1.0 / batch_size as f32)
}

/// Squared error of `(batch,)` similarity scores, divided by the batch size.
pub fn similarity_loss(scores: &Tensor, labels: &[f32], batch_size: usize) -> Tensor {
    let targets = Tensor::constant(Array1::from_vec(labels.to_vec()).into_dyn());
    let error = scores.clone() - targets;
    (error.clone() * error).sum().mul_scalar(1.0 / batch_size as f32)
}
