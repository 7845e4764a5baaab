use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

pub const N_SENTIMENT_CLASSES: usize = 5;

/// Whether the encoder is updated during fine-tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum FineTuneMode {
    /// Encoder frozen, only the task heads train.
    #[value(name = "last-linear-layer")]
    #[serde(rename = "last-linear-layer")]
    Frozen,
    #[value(name = "full-model")]
    #[serde(rename = "full-model")]
    FullyTrainable,
}

impl fmt::Display for FineTuneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FineTuneMode::Frozen => write!(f, "last-linear-layer"),
            FineTuneMode::FullyTrainable => write!(f, "full-model"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrainStrategy {
    /// One phase per task, each with a fresh optimizer.
    Sequential,
    /// Sum of the three task losses, one backward pass.
    Simultaneous,
    /// Gradient surgery over the three task losses.
    Pcgrad,
    /// Skip training and only write predictions from the checkpoint.
    #[value(name = "none")]
    #[serde(rename = "none")]
    Skip,
}

impl fmt::Display for TrainStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainStrategy::Sequential => "sequential",
            TrainStrategy::Simultaneous => "simultaneous",
            TrainStrategy::Pcgrad => "pcgrad",
            TrainStrategy::Skip => "none",
        };
        f.write_str(name)
    }
}

/// Paths of the three splits of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFiles {
    pub train: PathBuf,
    pub dev: PathBuf,
    pub test: PathBuf,
    pub dev_out: PathBuf,
    pub test_out: PathBuf,
}

impl TaskFiles {
    fn new(train: &str, dev: &str, test: &str, dev_out: &str, test_out: &str) -> TaskFiles {
        TaskFiles {
            train: train.into(),
            dev: dev.into(),
            test: test.into(),
            dev_out: dev_out.into(),
            test_out: test_out.into(),
        }
    }
}

/// Everything a run needs. Stored in every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub sst: TaskFiles,
    pub para: TaskFiles,
    pub sts: TaskFiles,

    pub seed: u64,
    pub epochs: usize,
    pub fine_tune_mode: FineTuneMode,
    pub train_type: TrainStrategy,
    pub lr: f32,
    pub weight_decay: f32,
    pub hidden_dropout_prob: f32,

    pub sst_batch_size: usize,
    pub para_batch_size: usize,
    pub sts_batch_size: usize,
    /// Random batches drawn per epoch by the multi-task strategies.
    pub steps_per_epoch: usize,

    pub hidden_size: usize,
    pub vocab_size: usize,
    pub max_seq_len: usize,

    pub model_path: Option<PathBuf>,
    pub file_prefix: String,
    pub log_dir: PathBuf,
    pub plots_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            sst: TaskFiles::new(
                "data/ids-sst-train.csv",
                "data/ids-sst-dev.csv",
                "data/ids-sst-test-student.csv",
                "predictions/sst-dev-output.csv",
                "predictions/sst-test-output.csv",
            ),
            para: TaskFiles::new(
                "data/quora-train.csv",
                "data/quora-dev.csv",
                "data/quora-test-student.csv",
                "predictions/para-dev-output.csv",
                "predictions/para-test-output.csv",
            ),
            sts: TaskFiles::new(
                "data/sts-train.csv",
                "data/sts-dev.csv",
                "data/sts-test-student.csv",
                "predictions/sts-dev-output.csv",
                "predictions/sts-test-output.csv",
            ),
            seed: 11711,
            epochs: 10,
            fine_tune_mode: FineTuneMode::Frozen,
            train_type: TrainStrategy::Sequential,
            lr: 1e-5,
            weight_decay: 0.0,
            hidden_dropout_prob: 0.3,
            sst_batch_size: 8,
            para_batch_size: 64,
            sts_batch_size: 8,
            steps_per_epoch: 1000,
            hidden_size: 128,
            vocab_size: 30522,
            max_seq_len: 64,
            model_path: None,
            file_prefix: String::new(),
            log_dir: "./logdir_multitask".into(),
            plots_dir: "plots".into(),
        }
    }
}

impl TrainConfig {
    /// Where the best checkpoint is written and read back for prediction.
    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.model_path {
            Some(path) => path.clone(),
            None => PathBuf::from(format!(
                "{}{}-{}-{}-multitask.json",
                self.file_prefix, self.fine_tune_mode, self.epochs, self.lr
            )),
        }
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            vocab_size: self.vocab_size,
            hidden_size: self.hidden_size,
            num_labels: N_SENTIMENT_CLASSES,
            hidden_dropout_prob: self.hidden_dropout_prob,
            fine_tune_mode: self.fine_tune_mode,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.hidden_dropout_prob) {
            return Err(TrainError::configuration(format!(
                "hidden dropout probability must be in [0, 1), got {}",
                self.hidden_dropout_prob
            )));
        }
        if self.sst_batch_size == 0 || self.para_batch_size == 0 || self.sts_batch_size == 0 {
            return Err(TrainError::configuration("batch sizes must be positive"));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(TrainError::configuration(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        if self.max_seq_len < 2 || self.vocab_size < 3 {
            return Err(TrainError::configuration(
                "tokenizer needs max_seq_len >= 2 and vocab_size >= 3",
            ));
        }
        Ok(())
    }
}

/// Shape of the model, enough to rebuild it from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_labels: usize,
    pub hidden_dropout_prob: f32,
    pub fine_tune_mode: FineTuneMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_checkpoint_path() {
        let config = TrainConfig {
            file_prefix: "run1-".to_string(),
            ..TrainConfig::default()
        };
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("run1-last-linear-layer-10-0.00001-multitask.json")
        );
    }

    #[test]
    fn test_model_path_overrides_checkpoint_path() {
        let config = TrainConfig {
            model_path: Some("saved.json".into()),
            ..TrainConfig::default()
        };
        assert_eq!(config.checkpoint_path(), PathBuf::from("saved.json"));
    }

    #[test]
    fn test_validate() {
        assert!(TrainConfig::default().validate().is_ok());
        let bad = TrainConfig {
            hidden_dropout_prob: 1.0,
            ..TrainConfig::default()
        };
        assert!(matches!(bad.validate(), Err(TrainError::Configuration(_))));
    }

    #[test]
    fn test_fine_tune_mode_names() {
        let parsed = FineTuneMode::from_str("full-model", false).unwrap();
        assert_eq!(parsed, FineTuneMode::FullyTrainable);
        assert_eq!(
            serde_json::to_string(&FineTuneMode::Frozen).unwrap(),
            "\"last-linear-layer\""
        );
        assert_eq!(TrainStrategy::from_str("pcgrad", false).unwrap(), TrainStrategy::Pcgrad);
    }
}
