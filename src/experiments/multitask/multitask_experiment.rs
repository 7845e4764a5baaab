use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{Result, TrainError};
use crate::random::RandomState;

use super::checkpoint::Checkpoint;
use super::config::{TrainConfig, TrainStrategy};
use super::data::{MultitaskSplit, Split};
use super::evaluation::{
    write_predictions, DevScores, MultitaskEvaluation, PARAPHRASE_HEADER, SENTIMENT_HEADER,
    SIMILARITY_HEADER,
};
use super::model::MultitaskModel;
use super::training::{Trainer, TrainingHistory};
use super::visualization::{plot_dev_score, plot_training_loss};

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub history: TrainingHistory,
    pub dev_scores: DevScores,
    pub checkpoint: Option<PathBuf>,
}

/// Trains with the configured strategy, then reloads the best checkpoint and
/// writes dev and test predictions for every task.
pub fn run_multitask_experiment(config: &TrainConfig) -> Result<ExperimentOutcome> {
    config.validate()?;
    info!(
        strategy = %config.train_type,
        mode = %config.fine_tune_mode,
        epochs = config.epochs,
        lr = config.lr,
        seed = config.seed,
        "starting multitask run"
    );

    let history = if config.train_type == TrainStrategy::Skip {
        TrainingHistory::default()
    } else {
        train(config)?
    };

    let checkpoint_path = config.checkpoint_path();
    let checkpoint = checkpoint_path.exists().then_some(checkpoint_path);
    let dev_scores = test_model(config)?;
    Ok(ExperimentOutcome {
        history,
        dev_scores,
        checkpoint,
    })
}

/// Training half of a run. Resumes from `model_path` when that file exists.
pub fn train(config: &TrainConfig) -> Result<TrainingHistory> {
    let mut random = RandomState::from_seed(config.seed);
    let train = MultitaskSplit::load(config, Split::Train)?;
    let dev = MultitaskSplit::load(config, Split::Dev)?;

    let model = MultitaskModel::new(&config.model_config(), &mut random.init)?;
    let resume = match &config.model_path {
        Some(path) if path.exists() => Some(Checkpoint::load(path)?),
        _ => None,
    };

    let mut trainer = Trainer::new(config, &train, &dev, &model, random);
    if let Some(checkpoint) = resume {
        trainer.resume_from(checkpoint)?;
    }
    let history = trainer.run(config.train_type)?;

    let prefix = format!("{}_", config.train_type);
    let plots = plot_training_loss(&history.epoch_losses, &config.plots_dir, &prefix)
        .and_then(|_| plot_dev_score(&history.dev_scores, &config.plots_dir, &prefix));
    if let Err(err) = plots {
        warn!(%err, "could not draw training plots");
    }
    Ok(history)
}

/// Reloads the saved checkpoint, writes the six prediction files and returns
/// the dev scores.
pub fn test_model(config: &TrainConfig) -> Result<DevScores> {
    let path = config.checkpoint_path();
    if !path.exists() {
        return Err(TrainError::configuration(format!(
            "no checkpoint at {} to predict with",
            path.display()
        )));
    }
    let checkpoint = Checkpoint::load(&path)?;
    let model = checkpoint.restore_model()?;
    info!(path = %path.display(), epoch = checkpoint.epoch, "loaded model for prediction");

    // Token ids must index the embedding table the checkpoint was trained with.
    let saved = &checkpoint.config;
    if saved.vocab_size != config.vocab_size || saved.max_seq_len != config.max_seq_len {
        warn!(
            vocab_size = saved.vocab_size,
            max_seq_len = saved.max_seq_len,
            "tokenizing with the checkpoint's vocabulary instead of the configured one"
        );
    }
    let data_config = TrainConfig {
        vocab_size: checkpoint.model_config.vocab_size,
        max_seq_len: saved.max_seq_len,
        ..config.clone()
    };
    let dev = MultitaskSplit::load(&data_config, Split::Dev)?;
    let test = MultitaskSplit::load(&data_config, Split::Test)?;

    let dev_eval = MultitaskEvaluation::run(&model, &dev);
    let test_eval = MultitaskEvaluation::run(&model, &test);

    write_predictions(&config.sst.dev_out, SENTIMENT_HEADER, &dev_eval.sentiment)?;
    write_predictions(&config.sst.test_out, SENTIMENT_HEADER, &test_eval.sentiment)?;
    write_predictions(&config.para.dev_out, PARAPHRASE_HEADER, &dev_eval.paraphrase)?;
    write_predictions(&config.para.test_out, PARAPHRASE_HEADER, &test_eval.paraphrase)?;
    write_predictions(&config.sts.dev_out, SIMILARITY_HEADER, &dev_eval.similarity)?;
    write_predictions(&config.sts.test_out, SIMILARITY_HEADER, &test_eval.similarity)?;

    let scores = dev_eval.scores();
    info!(
        sst_acc = scores.sentiment_accuracy,
        para_acc = scores.paraphrase_accuracy,
        sts_corr = scores.similarity_correlation,
        dev_score = scores.mean(),
        "dev results"
    );
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::experiments::multitask::config::{FineTuneMode, TaskFiles};

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn task_files(dir: &Path, task: &str, header: &str, labeled: &str, unlabeled: &str) -> TaskFiles {
        TaskFiles {
            train: write(dir, &format!("{task}-train.csv"), &format!("{header}\n{labeled}")),
            dev: write(dir, &format!("{task}-dev.csv"), &format!("{header}\n{labeled}")),
            test: write(dir, &format!("{task}-test.csv"), unlabeled),
            dev_out: dir.join(format!("predictions/{task}-dev-output.csv")),
            test_out: dir.join(format!("predictions/{task}-test-output.csv")),
        }
    }

    fn config_in(dir: &TempDir, strategy: TrainStrategy) -> TrainConfig {
        let root = dir.path();
        TrainConfig {
            sst: task_files(
                root,
                "sst",
                "id\tsentence\tsentiment",
                "s1\ta great film\t4\ns2\ta dull film\t0\ns3\tit is fine\t2\n",
                "id\tsentence\nt1\tsurprisingly good\n",
            ),
            para: task_files(
                root,
                "para",
                "id\tsentence1\tsentence2\tis_duplicate",
                "p1\thow do i cook rice\thow to cook rice\t1\np2\twhat is rust\twhere is paris\t0\n",
                "id\tsentence1\tsentence2\nq1\twho are you\twho is he\n",
            ),
            sts: task_files(
                root,
                "sts",
                "id\tsentence1\tsentence2\tsimilarity",
                "m1\ta man plays guitar\ta man plays music\t4.0\nm2\ta cat sleeps\tstocks fell\t0.2\n",
                "id\tsentence1\tsentence2\nn1\ta dog runs\ta dog is running\n",
            ),
            epochs: 2,
            steps_per_epoch: 2,
            lr: 1e-2,
            sst_batch_size: 2,
            para_batch_size: 2,
            sts_batch_size: 2,
            hidden_size: 4,
            vocab_size: 64,
            max_seq_len: 8,
            fine_tune_mode: FineTuneMode::FullyTrainable,
            train_type: strategy,
            file_prefix: format!("{}/", root.display()),
            log_dir: root.join("logs"),
            plots_dir: root.join("plots"),
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_pcgrad_run_writes_predictions() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir, TrainStrategy::Pcgrad);
        let outcome = run_multitask_experiment(&config).unwrap();

        assert_eq!(outcome.history.epoch_losses.len(), 2);
        assert_eq!(outcome.checkpoint, Some(config.checkpoint_path()));

        let sst_test = fs::read_to_string(&config.sst.test_out).unwrap();
        let mut lines = sst_test.lines();
        assert_eq!(lines.next(), Some("id , Predicted_Sentiment"));
        assert!(lines.next().unwrap().starts_with("t1 , "));

        let sts_dev = fs::read_to_string(&config.sts.dev_out).unwrap();
        assert_eq!(sts_dev.lines().count(), 3);
        assert!(config.para.dev_out.exists());
        assert!(config.para.test_out.exists());
    }

    #[test]
    fn test_skip_without_checkpoint_fails() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir, TrainStrategy::Skip);
        assert!(matches!(
            run_multitask_experiment(&config),
            Err(TrainError::Configuration(_))
        ));
    }

    #[test]
    fn test_resume_then_predict_only() {
        let dir = tempdir().unwrap();
        let trained = config_in(&dir, TrainStrategy::Simultaneous);
        run_multitask_experiment(&trained).unwrap();

        let resumed = TrainConfig {
            model_path: Some(trained.checkpoint_path()),
            epochs: 1,
            ..trained.clone()
        };
        let outcome = run_multitask_experiment(&resumed).unwrap();
        assert_eq!(outcome.history.epoch_losses.len(), 1);

        let predict_only = TrainConfig {
            train_type: TrainStrategy::Skip,
            ..resumed
        };
        let outcome = run_multitask_experiment(&predict_only).unwrap();
        assert!(outcome.history.epoch_losses.is_empty());
        assert!(outcome.dev_scores.mean().is_finite());
    }

    #[test]
    fn test_predict_uses_checkpoint_vocabulary() {
        let dir = tempdir().unwrap();
        let trained = config_in(&dir, TrainStrategy::Pcgrad);
        run_multitask_experiment(&trained).unwrap();

        let predict_only = TrainConfig {
            train_type: TrainStrategy::Skip,
            model_path: Some(trained.checkpoint_path()),
            vocab_size: 4096,
            max_seq_len: 32,
            ..trained.clone()
        };
        let outcome = run_multitask_experiment(&predict_only).unwrap();
        assert!(outcome.dev_scores.mean().is_finite());
        assert!(predict_only.sts.test_out.exists());
    }

    #[test]
    fn test_resume_with_other_vocabulary_is_rejected() {
        let dir = tempdir().unwrap();
        let trained = config_in(&dir, TrainStrategy::Simultaneous);
        run_multitask_experiment(&trained).unwrap();

        let resumed = TrainConfig {
            model_path: Some(trained.checkpoint_path()),
            vocab_size: 4096,
            ..trained.clone()
        };
        assert!(matches!(
            run_multitask_experiment(&resumed),
            Err(TrainError::Configuration(_))
        ));
    }
}
