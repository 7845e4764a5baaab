use std::fmt::Display;
use std::fs;
use std::path::Path;

use csv::WriterBuilder;
use ndarray::Axis;

use crate::data::DataLoaderExt;
use crate::error::Result;

use super::data::{MultitaskSplit, PairLoader, SentenceLoader};
use super::model::MultitaskModel;

/// Predictions for one split of one task. `score` is present for labeled splits.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvaluation<T> {
    pub ids: Vec<String>,
    pub predictions: Vec<T>,
    pub score: Option<f32>,
}

pub fn accuracy<T: PartialEq>(predictions: &[T], labels: &[T]) -> f32 {
    if predictions.is_empty() {
        return 0.0;
    }
    let correct = predictions.iter().zip(labels).filter(|(p, l)| p == l).count();
    correct as f32 / predictions.len() as f32
}

/// Pearson correlation; 0 when either side has no variance.
pub fn pearson(x: &[f32], y: &[f32]) -> f32 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let mean_x = x.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mean_y = y.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0f64, 0.0f64, 0.0f64);
    for (&a, &b) in x.iter().zip(y) {
        let dx = a as f64 - mean_x;
        let dy = b as f64 - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())) as f32
}

fn argmax<'a>(values: impl IntoIterator<Item = &'a f32>) -> usize {
    values
        .into_iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

pub fn evaluate_sentiment(model: &MultitaskModel, loader: &SentenceLoader) -> TaskEvaluation<usize> {
    let mut ids = Vec::new();
    let mut predictions = Vec::new();
    let mut labels = Some(Vec::new());
    for batch in loader.iter() {
        let logits = model
            .predict_sentiment(&batch.token_ids, &batch.attention_mask, None)
            .data();
        predictions.extend(logits.axis_iter(Axis(0)).map(|row| argmax(row.iter())));
        labels = labels.zip(batch.labels).map(|(mut all, batch)| {
            all.extend(batch);
            all
        });
        ids.extend(batch.ids);
    }
    let score = labels.map(|labels| accuracy(&predictions, &labels));
    TaskEvaluation {
        ids,
        predictions,
        score,
    }
}

/// Paraphrase predictions are 1 when the logit is positive.
pub fn evaluate_paraphrase(model: &MultitaskModel, loader: &PairLoader) -> TaskEvaluation<usize> {
    let mut ids = Vec::new();
    let mut predictions = Vec::new();
    let mut labels = Some(Vec::new());
    for batch in loader.iter() {
        let logits = model
            .predict_paraphrase(
                &batch.token_ids_1,
                &batch.attention_mask_1,
                &batch.token_ids_2,
                &batch.attention_mask_2,
                None,
            )
            .data();
        predictions.extend(logits.iter().map(|&logit| usize::from(logit > 0.0)));
        labels = labels.zip(batch.labels).map(|(mut all, batch)| {
            all.extend(batch.into_iter().map(|l| l as usize));
            all
        });
        ids.extend(batch.ids);
    }
    let score = labels.map(|labels| accuracy(&predictions, &labels));
    TaskEvaluation {
        ids,
        predictions,
        score,
    }
}

pub fn evaluate_similarity(model: &MultitaskModel, loader: &PairLoader) -> TaskEvaluation<f32> {
    let mut ids = Vec::new();
    let mut predictions = Vec::new();
    let mut labels = Some(Vec::new());
    for batch in loader.iter() {
        let scores = model
            .predict_similarity(
                &batch.token_ids_1,
                &batch.attention_mask_1,
                &batch.token_ids_2,
                &batch.attention_mask_2,
                None,
            )
            .data();
        predictions.extend(scores.iter().copied());
        labels = labels.zip(batch.labels).map(|(mut all, batch)| {
            all.extend(batch);
            all
        });
        ids.extend(batch.ids);
    }
    let score = labels.map(|labels| pearson(&predictions, &labels));
    TaskEvaluation {
        ids,
        predictions,
        score,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevScores {
    pub sentiment_accuracy: f32,
    pub paraphrase_accuracy: f32,
    pub similarity_correlation: f32,
}

impl DevScores {
    /// Averaged dev metric used for best-checkpoint selection.
    pub fn mean(&self) -> f32 {
        (self.sentiment_accuracy + self.paraphrase_accuracy + self.similarity_correlation) / 3.0
    }
}

/// Evaluation of all three tasks on one split.
pub struct MultitaskEvaluation {
    pub sentiment: TaskEvaluation<usize>,
    pub paraphrase: TaskEvaluation<usize>,
    pub similarity: TaskEvaluation<f32>,
}

impl MultitaskEvaluation {
    pub fn run(model: &MultitaskModel, split: &MultitaskSplit) -> MultitaskEvaluation {
        MultitaskEvaluation {
            sentiment: evaluate_sentiment(model, &split.sst),
            paraphrase: evaluate_paraphrase(model, &split.para),
            similarity: evaluate_similarity(model, &split.sts),
        }
    }

    pub fn scores(&self) -> DevScores {
        DevScores {
            sentiment_accuracy: self.sentiment.score.unwrap_or(0.0),
            paraphrase_accuracy: self.paraphrase.score.unwrap_or(0.0),
            similarity_correlation: self.similarity.score.unwrap_or(0.0),
        }
    }
}

pub const SENTIMENT_HEADER: &str = "Predicted_Sentiment";
pub const PARAPHRASE_HEADER: &str = "Predicted_Is_Paraphrase";
pub const SIMILARITY_HEADER: &str = "Predicted_Similarity";

/// Writes `id , <header>` followed by one `<id> , <prediction>` row per example.
pub fn write_predictions<T: Display>(
    path: &Path,
    header: &str,
    evaluation: &TaskEvaluation<T>,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(["id ".to_string(), format!(" {header}")])?;
    for (id, prediction) in evaluation.ids.iter().zip(&evaluation.predictions) {
        writer.write_record([format!("{id} "), format!(" {prediction}")])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[1, 2, 3, 4], &[1, 2, 0, 0]), 0.5);
        assert_eq!(accuracy::<usize>(&[], &[]), 0.0);
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-6);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-6);
        assert_eq!(pearson(&[1.0, 1.0], &[0.0, 5.0]), 0.0);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
    }

    #[test]
    fn test_dev_score_mean() {
        let scores = DevScores {
            sentiment_accuracy: 0.3,
            paraphrase_accuracy: 0.6,
            similarity_correlation: 0.9,
        };
        assert!((scores.mean() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_write_predictions_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("predictions").join("sst-dev-output.csv");
        let evaluation = TaskEvaluation {
            ids: vec!["a1".to_string(), "b2".to_string()],
            predictions: vec![3usize, 0],
            score: None,
        };
        write_predictions(&path, SENTIMENT_HEADER, &evaluation).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "id , Predicted_Sentiment\na1 , 3\nb2 , 0\n");
    }
}
