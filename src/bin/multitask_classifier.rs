use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use multitask_pcgrad::experiments::multitask::config::{
    FineTuneMode, TaskFiles, TrainConfig, TrainStrategy,
};
use multitask_pcgrad::experiments::multitask::run_multitask_experiment;

/// Fine-tunes a shared encoder on sentiment, paraphrase and similarity data
/// and writes dev/test predictions.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, default_value = "data/ids-sst-train.csv")]
    sst_train: PathBuf,
    #[arg(long, default_value = "data/ids-sst-dev.csv")]
    sst_dev: PathBuf,
    #[arg(long, default_value = "data/ids-sst-test-student.csv")]
    sst_test: PathBuf,

    #[arg(long, default_value = "data/quora-train.csv")]
    para_train: PathBuf,
    #[arg(long, default_value = "data/quora-dev.csv")]
    para_dev: PathBuf,
    #[arg(long, default_value = "data/quora-test-student.csv")]
    para_test: PathBuf,

    #[arg(long, default_value = "data/sts-train.csv")]
    sts_train: PathBuf,
    #[arg(long, default_value = "data/sts-dev.csv")]
    sts_dev: PathBuf,
    #[arg(long, default_value = "data/sts-test-student.csv")]
    sts_test: PathBuf,

    #[arg(long, default_value_t = 11711)]
    seed: u64,
    #[arg(long, default_value_t = 10)]
    epochs: usize,
    /// last-linear-layer: the encoder is frozen. full-model: everything trains.
    #[arg(long, value_enum, default_value_t = FineTuneMode::Frozen)]
    fine_tune_mode: FineTuneMode,
    #[arg(long, value_enum, default_value_t = TrainStrategy::Sequential)]
    train_type: TrainStrategy,

    #[arg(long, default_value = "predictions/sst-dev-output.csv")]
    sst_dev_out: PathBuf,
    #[arg(long, default_value = "predictions/sst-test-output.csv")]
    sst_test_out: PathBuf,
    #[arg(long, default_value = "predictions/para-dev-output.csv")]
    para_dev_out: PathBuf,
    #[arg(long, default_value = "predictions/para-test-output.csv")]
    para_test_out: PathBuf,
    #[arg(long, default_value = "predictions/sts-dev-output.csv")]
    sts_dev_out: PathBuf,
    #[arg(long, default_value = "predictions/sts-test-output.csv")]
    sts_test_out: PathBuf,

    #[arg(long, default_value_t = 8)]
    sst_batch_size: usize,
    #[arg(long, default_value_t = 64)]
    para_batch_size: usize,
    #[arg(long, default_value_t = 8)]
    sts_batch_size: usize,
    /// Random batches per epoch for the simultaneous and pcgrad strategies.
    #[arg(long, default_value_t = 1000)]
    steps_per_epoch: usize,

    #[arg(long, default_value_t = 0.3)]
    hidden_dropout_prob: f32,
    #[arg(long, default_value_t = 1e-5)]
    lr: f32,
    #[arg(long, default_value_t = 0.0)]
    weight_decay: f32,

    #[arg(long, default_value_t = 128)]
    hidden_size: usize,
    #[arg(long, default_value_t = 30522)]
    vocab_size: usize,
    #[arg(long, default_value_t = 64)]
    max_seq_len: usize,

    /// Checkpoint to resume from; also where the best model is saved.
    #[arg(long)]
    model_path: Option<PathBuf>,
    #[arg(long, default_value = "")]
    file_prefix: String,
    #[arg(long, default_value = "./logdir_multitask")]
    log_dir: PathBuf,
    #[arg(long, default_value = "plots")]
    plots_dir: PathBuf,
}

impl From<Args> for TrainConfig {
    fn from(args: Args) -> Self {
        TrainConfig {
            sst: TaskFiles {
                train: args.sst_train,
                dev: args.sst_dev,
                test: args.sst_test,
                dev_out: args.sst_dev_out,
                test_out: args.sst_test_out,
            },
            para: TaskFiles {
                train: args.para_train,
                dev: args.para_dev,
                test: args.para_test,
                dev_out: args.para_dev_out,
                test_out: args.para_test_out,
            },
            sts: TaskFiles {
                train: args.sts_train,
                dev: args.sts_dev,
                test: args.sts_test,
                dev_out: args.sts_dev_out,
                test_out: args.sts_test_out,
            },
            seed: args.seed,
            epochs: args.epochs,
            fine_tune_mode: args.fine_tune_mode,
            train_type: args.train_type,
            lr: args.lr,
            weight_decay: args.weight_decay,
            hidden_dropout_prob: args.hidden_dropout_prob,
            sst_batch_size: args.sst_batch_size,
            para_batch_size: args.para_batch_size,
            sts_batch_size: args.sts_batch_size,
            steps_per_epoch: args.steps_per_epoch,
            hidden_size: args.hidden_size,
            vocab_size: args.vocab_size,
            max_seq_len: args.max_seq_len,
            model_path: args.model_path,
            file_prefix: args.file_prefix,
            log_dir: args.log_dir,
            plots_dir: args.plots_dir,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TrainConfig::from(Args::parse());
    let checkpoint = config.checkpoint_path();
    let outcome = run_multitask_experiment(&config)
        .with_context(|| format!("multitask run with checkpoint {}", checkpoint.display()))?;

    info!(
        dev_score = outcome.dev_scores.mean(),
        epochs = outcome.history.epoch_losses.len(),
        "run finished"
    );
    Ok(())
}
