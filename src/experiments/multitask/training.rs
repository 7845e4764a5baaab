use indicatif::{ProgressBar, ProgressStyle};
use tensorboard_rs::summary_writer::SummaryWriter;
use tracing::{debug, info, warn};

use crate::data::{DataLoader, DataLoaderExt};
use crate::error::{Result, TrainError};
use crate::optim::{AdamOptimizer, Optimizer, PcGrad, SurgeryReport};
use crate::random::{RandomState, TensorRng};
use crate::tensor::Tensor;

use super::checkpoint::{Checkpoint, SavedOptimizer};
use super::config::{TrainConfig, TrainStrategy};
use super::data::{MultitaskSplit, PairBatch, SentenceBatch};
use super::evaluation::{evaluate_paraphrase, evaluate_sentiment, evaluate_similarity, MultitaskEvaluation};
use super::loss::{paraphrase_loss, sentiment_loss, similarity_loss};
use super::model::MultitaskModel;

pub const TASK_NAMES: [&str; 3] = ["sst", "para", "sts"];

/// One training batch per task.
#[derive(Debug, Clone)]
pub struct TaskBatches {
    pub sst: SentenceBatch,
    pub para: PairBatch,
    pub sts: PairBatch,
}

impl TaskBatches {
    /// Draws an independent random batch from each training loader.
    pub fn sample(train: &MultitaskSplit, rng: &mut TensorRng) -> Result<TaskBatches> {
        let empty = |task: &str| TrainError::configuration(format!("no {task} training examples"));
        Ok(TaskBatches {
            sst: train.sst.random_batch(rng).ok_or_else(|| empty("sst"))?,
            para: train.para.random_batch(rng).ok_or_else(|| empty("para"))?,
            sts: train.sts.random_batch(rng).ok_or_else(|| empty("sts"))?,
        })
    }
}

fn labels_of<'b, T>(labels: &'b Option<Vec<T>>, task: &str) -> Result<&'b [T]> {
    labels
        .as_deref()
        .ok_or_else(|| TrainError::configuration(format!("{task} training batch has no labels")))
}

pub fn sentiment_batch_loss(
    model: &MultitaskModel,
    batch: &SentenceBatch,
    batch_size: usize,
    dropout: &mut TensorRng,
) -> Result<Tensor> {
    let labels = labels_of(&batch.labels, "sst")?;
    let logits = model.predict_sentiment(&batch.token_ids, &batch.attention_mask, Some(dropout));
    Ok(sentiment_loss(&logits, labels, batch_size))
}

pub fn paraphrase_batch_loss(
    model: &MultitaskModel,
    batch: &PairBatch,
    batch_size: usize,
    dropout: &mut TensorRng,
) -> Result<Tensor> {
    let labels = labels_of(&batch.labels, "para")?;
    let logits = model.predict_paraphrase(
        &batch.token_ids_1,
        &batch.attention_mask_1,
        &batch.token_ids_2,
        &batch.attention_mask_2,
        Some(dropout),
    );
    Ok(paraphrase_loss(&logits, labels, batch_size))
}

pub fn similarity_batch_loss(
    model: &MultitaskModel,
    batch: &PairBatch,
    batch_size: usize,
    dropout: &mut TensorRng,
) -> Result<Tensor> {
    let labels = labels_of(&batch.labels, "sts")?;
    let scores = model.predict_similarity(
        &batch.token_ids_1,
        &batch.attention_mask_1,
        &batch.token_ids_2,
        &batch.attention_mask_2,
        Some(dropout),
    );
    Ok(similarity_loss(&scores, labels, batch_size))
}

/// Sentiment, paraphrase and similarity losses from one forward pass over the
/// shared model.
pub fn task_losses(
    model: &MultitaskModel,
    batches: &TaskBatches,
    config: &TrainConfig,
    random: &mut RandomState,
) -> Result<Vec<Tensor>> {
    Ok(vec![
        sentiment_batch_loss(model, &batches.sst, config.sst_batch_size, &mut random.dropout)?,
        paraphrase_batch_loss(model, &batches.para, config.para_batch_size, &mut random.dropout)?,
        similarity_batch_loss(model, &batches.sts, config.sts_batch_size, &mut random.dropout)?,
    ])
}

fn finite_values(losses: &[Tensor]) -> Result<Vec<f32>> {
    losses
        .iter()
        .enumerate()
        .map(|(task, loss)| {
            let value = loss.item().ok_or_else(|| {
                TrainError::configuration(format!("loss of task {task} is not a scalar"))
            })?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(TrainError::NonFiniteLoss { task, value })
            }
        })
        .collect()
}

/// clear_gradients, compute_combined_gradients, apply_update.
pub fn pcgrad_step<O: Optimizer>(
    model: &MultitaskModel,
    optimizer: &mut PcGrad<O>,
    batches: &TaskBatches,
    config: &TrainConfig,
    random: &mut RandomState,
) -> Result<SurgeryReport> {
    let mut step = optimizer.clear_gradients();
    let losses = task_losses(model, batches, config, random)?;
    let report = step.compute_combined_gradients(&losses)?;
    step.apply_update();
    Ok(report)
}

/// Backpropagates the unweighted sum of the task losses once.
pub fn simultaneous_step<O: Optimizer>(
    model: &MultitaskModel,
    optimizer: &mut O,
    batches: &TaskBatches,
    config: &TrainConfig,
    random: &mut RandomState,
) -> Result<Vec<f32>> {
    optimizer.zero_grad();
    let losses = task_losses(model, batches, config, random)?;
    let values = finite_values(&losses)?;
    let mut terms = losses.into_iter();
    if let Some(first) = terms.next() {
        terms.fold(first, |total, loss| total + loss).backward();
        optimizer.step();
    }
    Ok(values)
}

/// Plain update on a single task loss.
pub fn single_task_step<O: Optimizer>(optimizer: &mut O, loss: &Tensor) -> Result<f32> {
    let value = finite_values(std::slice::from_ref(loss))?[0];
    optimizer.zero_grad();
    loss.backward();
    optimizer.step();
    Ok(value)
}

/// A multi-task update rule the epoch loop can drive and checkpoint.
pub trait MultitaskStep {
    fn name(&self) -> &'static str;
    /// Runs one update and returns the per-task loss values.
    fn step(
        &mut self,
        model: &MultitaskModel,
        batches: &TaskBatches,
        config: &TrainConfig,
        random: &mut RandomState,
    ) -> Result<Vec<f32>>;
    fn saved_state(&self) -> SavedOptimizer;
    /// Restores a saved state; `false` when it belongs to another strategy.
    fn restore(&mut self, saved: &SavedOptimizer) -> Result<bool>;
}

pub struct SurgeryStrategy<O: Optimizer>(pub PcGrad<O>);

impl<O: Optimizer> MultitaskStep for SurgeryStrategy<O> {
    fn name(&self) -> &'static str {
        "pcgrad"
    }

    fn step(
        &mut self,
        model: &MultitaskModel,
        batches: &TaskBatches,
        config: &TrainConfig,
        random: &mut RandomState,
    ) -> Result<Vec<f32>> {
        let report = pcgrad_step(model, &mut self.0, batches, config, random)?;
        Ok(report.task_losses)
    }

    fn saved_state(&self) -> SavedOptimizer {
        SavedOptimizer::PcGrad(self.0.state())
    }

    fn restore(&mut self, saved: &SavedOptimizer) -> Result<bool> {
        match saved {
            SavedOptimizer::PcGrad(state) => {
                self.0.load_state(state.clone())?;
                Ok(true)
            }
            SavedOptimizer::Base(_) => Ok(false),
        }
    }
}

pub struct SummedStrategy<O: Optimizer>(pub O);

impl<O: Optimizer> MultitaskStep for SummedStrategy<O> {
    fn name(&self) -> &'static str {
        "simultaneous"
    }

    fn step(
        &mut self,
        model: &MultitaskModel,
        batches: &TaskBatches,
        config: &TrainConfig,
        random: &mut RandomState,
    ) -> Result<Vec<f32>> {
        simultaneous_step(model, &mut self.0, batches, config, random)
    }

    fn saved_state(&self) -> SavedOptimizer {
        SavedOptimizer::Base(self.0.state())
    }

    fn restore(&mut self, saved: &SavedOptimizer) -> Result<bool> {
        match saved {
            SavedOptimizer::Base(state) => {
                self.0.load_state(state.clone())?;
                Ok(true)
            }
            SavedOptimizer::PcGrad(_) => Ok(false),
        }
    }
}

/// Losses and dev scores collected during training.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub step_losses: Vec<f32>,
    pub epoch_losses: Vec<f32>,
    pub dev_scores: Vec<f32>,
    pub best_dev_score: Option<f32>,
}

fn progress_bar(len: usize, message: String) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message);
    pb
}

fn adam_for(model: &MultitaskModel, config: &TrainConfig) -> AdamOptimizer {
    AdamOptimizer::new(
        config.lr,
        0.9,
        0.999,
        1e-8,
        config.weight_decay,
        model.trainable_parameters(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequentialPhase {
    Sentiment,
    Paraphrase,
    Similarity,
}

/// Drives one training run: epochs, dev evaluation, best checkpoint.
pub struct Trainer<'a> {
    config: &'a TrainConfig,
    train: &'a MultitaskSplit,
    dev: &'a MultitaskSplit,
    model: &'a MultitaskModel,
    random: RandomState,
    writer: SummaryWriter,
    global_step: usize,
    resume: Option<Checkpoint>,
}

impl<'a> Trainer<'a> {
    pub fn new(
        config: &'a TrainConfig,
        train: &'a MultitaskSplit,
        dev: &'a MultitaskSplit,
        model: &'a MultitaskModel,
        random: RandomState,
    ) -> Trainer<'a> {
        Trainer {
            config,
            train,
            dev,
            model,
            random,
            writer: SummaryWriter::new(&config.log_dir),
            global_step: 0,
            resume: None,
        }
    }

    /// Continues from `checkpoint`: model weights and random state now, the
    /// optimizer state once the matching strategy starts.
    pub fn resume_from(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.model.load_state(&checkpoint.model)?;
        self.random = checkpoint.random.clone();
        info!(epoch = checkpoint.epoch, best_dev_score = checkpoint.best_dev_score, "resuming from checkpoint");
        self.resume = Some(checkpoint);
        Ok(())
    }

    pub fn random(&self) -> &RandomState {
        &self.random
    }

    pub fn run(&mut self, strategy: TrainStrategy) -> Result<TrainingHistory> {
        if strategy != TrainStrategy::Skip && self.train.is_empty() {
            return Err(TrainError::configuration("every task needs training examples"));
        }
        let history = match strategy {
            TrainStrategy::Sequential => self.train_sequential()?,
            TrainStrategy::Simultaneous => {
                let mut strategy = SummedStrategy(adam_for(self.model, self.config));
                self.train_multitask(&mut strategy)?
            }
            TrainStrategy::Pcgrad => {
                let optimizer = PcGrad::new(adam_for(self.model, self.config), self.config.seed);
                let mut strategy = SurgeryStrategy(optimizer);
                self.train_multitask(&mut strategy)?
            }
            TrainStrategy::Skip => {
                info!("not training");
                TrainingHistory::default()
            }
        };
        self.writer.flush();
        Ok(history)
    }

    fn initial_best(&self) -> f32 {
        self.resume
            .as_ref()
            .map_or(f32::NEG_INFINITY, |checkpoint| checkpoint.best_dev_score)
    }

    fn log_step(&mut self, prefix: &str, task_losses: &[(&str, f32)]) {
        let mut total = 0.0;
        for (task, value) in task_losses {
            self.writer
                .add_scalar(&format!("{prefix}/{task}_loss"), *value, self.global_step);
            total += value;
        }
        self.writer
            .add_scalar(&format!("{prefix}/loss"), total, self.global_step);
        self.global_step += 1;
    }

    /// Saves a checkpoint when `score` beats `best`.
    fn save_if_best(
        &mut self,
        epoch: usize,
        score: f32,
        best: &mut f32,
        optimizer: Option<SavedOptimizer>,
    ) -> Result<bool> {
        if score <= *best {
            debug!(epoch, score, best = *best, "dev score did not improve, checkpoint not saved");
            return Ok(false);
        }
        *best = score;
        Checkpoint::capture(self.model, optimizer, self.config, &self.random, epoch, score)
            .save(&self.config.checkpoint_path())?;
        Ok(true)
    }

    /// Epoch loop shared by the simultaneous and gradient surgery strategies.
    pub fn train_multitask<S: MultitaskStep>(&mut self, strategy: &mut S) -> Result<TrainingHistory> {
        let (config, model, train, dev) = (self.config, self.model, self.train, self.dev);
        let name = strategy.name();
        if let Some(saved) = self.resume.as_ref().and_then(|c| c.optimizer.as_ref()) {
            if !strategy.restore(saved)? {
                warn!(strategy = name, "checkpoint optimizer state belongs to another strategy, starting fresh");
            }
        }
        let mut best = self.initial_best();
        let mut history = TrainingHistory::default();
        info!(strategy = name, epochs = config.epochs, steps = config.steps_per_epoch, "training");

        for epoch in 0..config.epochs {
            let pb = progress_bar(config.steps_per_epoch, format!("{name}-{epoch}"));
            let mut epoch_loss = 0.0;
            for _ in 0..config.steps_per_epoch {
                let batches = TaskBatches::sample(train, &mut self.random.shuffle)?;
                let values = strategy.step(model, &batches, config, &mut self.random)?;
                let total: f32 = values.iter().sum();
                let named: Vec<(&str, f32)> = TASK_NAMES.iter().copied().zip(values).collect();
                self.log_step(name, &named);
                epoch_loss += total;
                history.step_losses.push(total);
                pb.inc(1);
            }
            pb.finish_and_clear();

            let train_loss = epoch_loss / config.steps_per_epoch.max(1) as f32;
            let scores = MultitaskEvaluation::run(model, dev).scores();
            let dev_score = scores.mean();
            self.writer.add_scalar(&format!("{name}/epoch_loss"), train_loss, epoch);
            self.writer.add_scalar(&format!("{name}/dev_sst_acc"), scores.sentiment_accuracy, epoch);
            self.writer.add_scalar(&format!("{name}/dev_para_acc"), scores.paraphrase_accuracy, epoch);
            self.writer.add_scalar(&format!("{name}/dev_sts_corr"), scores.similarity_correlation, epoch);
            self.writer.add_scalar(&format!("{name}/dev_score"), dev_score, epoch);

            self.save_if_best(epoch, dev_score, &mut best, Some(strategy.saved_state()))?;
            history.epoch_losses.push(train_loss);
            history.dev_scores.push(dev_score);
            info!(
                epoch,
                train_loss,
                sst_acc = scores.sentiment_accuracy,
                para_acc = scores.paraphrase_accuracy,
                sts_corr = scores.similarity_correlation,
                dev_score,
                "epoch finished"
            );
        }
        history.best_dev_score = best.is_finite().then_some(best);
        Ok(history)
    }

    /// One phase per task, each with a fresh optimizer and its own best dev
    /// score.
    pub fn train_sequential(&mut self) -> Result<TrainingHistory> {
        let mut history = TrainingHistory::default();
        for phase in [
            SequentialPhase::Sentiment,
            SequentialPhase::Paraphrase,
            SequentialPhase::Similarity,
        ] {
            let phase_history = self.train_phase(phase)?;
            history.step_losses.extend(phase_history.step_losses);
            history.epoch_losses.extend(phase_history.epoch_losses);
            history.dev_scores.extend(phase_history.dev_scores);
            history.best_dev_score = phase_history.best_dev_score;
        }
        Ok(history)
    }

    fn train_phase(&mut self, phase: SequentialPhase) -> Result<TrainingHistory> {
        let (config, model, train, dev) = (self.config, self.model, self.train, self.dev);
        let mut optimizer = adam_for(model, config);
        let mut best = f32::NEG_INFINITY;
        let mut history = TrainingHistory::default();
        let task = match phase {
            SequentialPhase::Sentiment => TASK_NAMES[0],
            SequentialPhase::Paraphrase => TASK_NAMES[1],
            SequentialPhase::Similarity => TASK_NAMES[2],
        };
        info!(task, epochs = config.epochs, "training sequential phase");

        for epoch in 0..config.epochs {
            let steps = match phase {
                SequentialPhase::Sentiment => train.sst.num_batches(),
                SequentialPhase::Paraphrase => config.steps_per_epoch,
                SequentialPhase::Similarity => train.sts.num_batches(),
            };
            let pb = progress_bar(steps, format!("{task}-{epoch}"));
            let mut losses = Vec::with_capacity(steps);

            match phase {
                SequentialPhase::Sentiment => {
                    for batch in train.sst.iter_shuffled(&mut self.random.shuffle) {
                        let loss = sentiment_batch_loss(model, &batch, config.sst_batch_size, &mut self.random.dropout)?;
                        let value = single_task_step(&mut optimizer, &loss)?;
                        self.log_step("sequential", &[(task, value)]);
                        losses.push(value);
                        pb.inc(1);
                    }
                }
                SequentialPhase::Paraphrase => {
                    for _ in 0..steps {
                        let batch = train
                            .para
                            .random_batch(&mut self.random.shuffle)
                            .ok_or_else(|| TrainError::configuration("no para training examples"))?;
                        let loss = paraphrase_batch_loss(model, &batch, config.para_batch_size, &mut self.random.dropout)?;
                        let value = single_task_step(&mut optimizer, &loss)?;
                        self.log_step("sequential", &[(task, value)]);
                        losses.push(value);
                        pb.inc(1);
                    }
                }
                SequentialPhase::Similarity => {
                    for batch in train.sts.iter_shuffled(&mut self.random.shuffle) {
                        let loss = similarity_batch_loss(model, &batch, config.sts_batch_size, &mut self.random.dropout)?;
                        let value = single_task_step(&mut optimizer, &loss)?;
                        self.log_step("sequential", &[(task, value)]);
                        losses.push(value);
                        pb.inc(1);
                    }
                }
            }
            pb.finish_and_clear();

            let train_loss = losses.iter().sum::<f32>() / losses.len().max(1) as f32;
            let dev_score = match phase {
                SequentialPhase::Sentiment => evaluate_sentiment(model, &dev.sst).score,
                SequentialPhase::Paraphrase => evaluate_paraphrase(model, &dev.para).score,
                SequentialPhase::Similarity => evaluate_similarity(model, &dev.sts).score,
            }
            .unwrap_or(0.0);
            self.writer.add_scalar(&format!("sequential/{task}_epoch_loss"), train_loss, epoch);
            self.writer.add_scalar(&format!("sequential/{task}_dev_score"), dev_score, epoch);

            self.save_if_best(
                epoch,
                dev_score,
                &mut best,
                Some(SavedOptimizer::Base(optimizer.state())),
            )?;
            history.step_losses.extend(losses);
            history.epoch_losses.push(train_loss);
            history.dev_scores.push(dev_score);
            info!(task, epoch, train_loss, dev_score, "epoch finished");
        }
        history.best_dev_score = best.is_finite().then_some(best);
        Ok(history)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::SeedableRng;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::experiments::multitask::config::FineTuneMode;
    use crate::experiments::multitask::data::{
        HashingTokenizer, PairExample, PairLoader, SentenceExample, SentenceLoader,
    };

    const SENTENCES: [&str; 6] = [
        "a great and moving film",
        "dull , tedious and flat",
        "the best movie of the year",
        "an utter waste of time",
        "charming if slight",
        "painfully long",
    ];

    pub(crate) fn tiny_split(config: &TrainConfig) -> MultitaskSplit {
        let tokenizer = HashingTokenizer::new(config.vocab_size, config.max_seq_len);
        let sst = SENTENCES
            .iter()
            .enumerate()
            .map(|(i, s)| SentenceExample {
                id: format!("sst{i}"),
                sentence: s.to_string(),
                label: Some(i % 5),
            })
            .collect();
        let pairs = |prefix: &str, scale: f32| -> Vec<PairExample> {
            SENTENCES
                .iter()
                .zip(SENTENCES.iter().rev())
                .enumerate()
                .map(|(i, (a, b))| PairExample {
                    id: format!("{prefix}{i}"),
                    sentence1: a.to_string(),
                    sentence2: b.to_string(),
                    label: Some((i % 2) as f32 * scale),
                })
                .collect()
        };
        MultitaskSplit {
            sst: SentenceLoader::new(sst, tokenizer.clone(), config.sst_batch_size),
            para: PairLoader::new(pairs("para", 1.0), tokenizer.clone(), config.para_batch_size),
            sts: PairLoader::new(pairs("sts", 5.0), tokenizer, config.sts_batch_size),
        }
    }

    pub(crate) fn tiny_config(dir: &TempDir, strategy: TrainStrategy) -> TrainConfig {
        TrainConfig {
            epochs: 2,
            steps_per_epoch: 3,
            lr: 1e-2,
            sst_batch_size: 2,
            para_batch_size: 3,
            sts_batch_size: 2,
            hidden_size: 4,
            vocab_size: 32,
            max_seq_len: 8,
            fine_tune_mode: FineTuneMode::FullyTrainable,
            train_type: strategy,
            file_prefix: format!("{}/", dir.path().display()),
            log_dir: dir.path().join("logs"),
            plots_dir: dir.path().join("plots"),
            ..TrainConfig::default()
        }
    }

    fn model_for(config: &TrainConfig, random: &mut RandomState) -> MultitaskModel {
        MultitaskModel::new(&config.model_config(), &mut random.init).unwrap()
    }

    #[test]
    fn test_task_losses_are_scalar_and_finite() {
        let dir = tempdir().unwrap();
        let config = tiny_config(&dir, TrainStrategy::Pcgrad);
        let split = tiny_split(&config);
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);

        let batches = TaskBatches::sample(&split, &mut random.shuffle).unwrap();
        assert_eq!(batches.sst.len(), 2);
        assert_eq!(batches.para.len(), 3);
        let losses = task_losses(&model, &batches, &config, &mut random).unwrap();
        let values = finite_values(&losses).unwrap();
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_pcgrad_step_updates_shared_encoder() {
        let dir = tempdir().unwrap();
        let config = tiny_config(&dir, TrainStrategy::Pcgrad);
        let split = tiny_split(&config);
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);
        let before = model.state();

        let mut optimizer = PcGrad::new(adam_for(&model, &config), config.seed);
        let batches = TaskBatches::sample(&split, &mut random.shuffle).unwrap();
        let report = pcgrad_step(&model, &mut optimizer, &batches, &config, &mut random).unwrap();
        assert_eq!(report.task_losses.len(), 3);

        let after = model.state();
        let (name, _) = &after.parameters[0];
        assert_eq!(name, "encoder.embeddings");
        assert_ne!(before.parameters[0].1, after.parameters[0].1);
    }

    #[test]
    fn test_simultaneous_step_reports_task_losses() {
        let dir = tempdir().unwrap();
        let config = tiny_config(&dir, TrainStrategy::Simultaneous);
        let split = tiny_split(&config);
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);
        let mut optimizer = adam_for(&model, &config);

        let batches = TaskBatches::sample(&split, &mut random.shuffle).unwrap();
        let values = simultaneous_step(&model, &mut optimizer, &batches, &config, &mut random).unwrap();
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert_eq!(optimizer.steps(), 1);
    }

    #[test]
    fn test_unlabeled_batch_is_rejected() {
        let dir = tempdir().unwrap();
        let config = tiny_config(&dir, TrainStrategy::Pcgrad);
        let mut split = tiny_split(&config);
        split.sst = SentenceLoader::new(
            vec![SentenceExample {
                id: "x".to_string(),
                sentence: "no label".to_string(),
                label: None,
            }],
            HashingTokenizer::new(config.vocab_size, config.max_seq_len),
            1,
        );
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);
        let batches = TaskBatches::sample(&split, &mut random.shuffle).unwrap();
        assert!(matches!(
            task_losses(&model, &batches, &config, &mut random),
            Err(TrainError::Configuration(_))
        ));
    }

    #[test]
    fn test_pcgrad_training_saves_best_checkpoint() {
        let dir = tempdir().unwrap();
        let config = tiny_config(&dir, TrainStrategy::Pcgrad);
        let split = tiny_split(&config);
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);

        let mut trainer = Trainer::new(&config, &split, &split, &model, random);
        let history = trainer.run(TrainStrategy::Pcgrad).unwrap();
        assert_eq!(history.step_losses.len(), 6);
        assert_eq!(history.epoch_losses.len(), 2);
        assert!(history.best_dev_score.is_some());

        let checkpoint = Checkpoint::load(&config.checkpoint_path()).unwrap();
        assert!(matches!(checkpoint.optimizer, Some(SavedOptimizer::PcGrad(_))));
        assert_eq!(checkpoint.best_dev_score, history.best_dev_score.unwrap());
    }

    #[test]
    fn test_sequential_training_runs_three_phases() {
        let dir = tempdir().unwrap();
        let config = tiny_config(&dir, TrainStrategy::Sequential);
        let split = tiny_split(&config);
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);

        let mut trainer = Trainer::new(&config, &split, &split, &model, random);
        let history = trainer.run(TrainStrategy::Sequential).unwrap();
        // two epochs per phase
        assert_eq!(history.epoch_losses.len(), 6);
        // 3 sst batches, 3 para steps, 3 sts batches per epoch
        assert_eq!(history.step_losses.len(), 18);
        assert!(config.checkpoint_path().exists());
    }

    #[test]
    fn test_checkpoint_resume_reproduces_next_step() {
        let dir = tempdir().unwrap();
        let config = tiny_config(&dir, TrainStrategy::Pcgrad);
        let split = tiny_split(&config);
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);
        let mut optimizer = PcGrad::new(adam_for(&model, &config), config.seed);

        let batches = TaskBatches::sample(&split, &mut random.shuffle).unwrap();
        pcgrad_step(&model, &mut optimizer, &batches, &config, &mut random).unwrap();

        let path = dir.path().join("resume.json");
        Checkpoint::capture(
            &model,
            Some(SavedOptimizer::PcGrad(optimizer.state())),
            &config,
            &random,
            0,
            0.0,
        )
        .save(&path)
        .unwrap();

        // continue the original run
        let batches = TaskBatches::sample(&split, &mut random.shuffle).unwrap();
        pcgrad_step(&model, &mut optimizer, &batches, &config, &mut random).unwrap();

        // continue from the checkpoint
        let checkpoint = Checkpoint::load(&path).unwrap();
        let restored = checkpoint.restore_model().unwrap();
        let mut restored_random = checkpoint.random.clone();
        let mut restored_optimizer = PcGrad::new(adam_for(&restored, &config), 0);
        let Some(SavedOptimizer::PcGrad(state)) = checkpoint.optimizer.clone() else {
            panic!("checkpoint lacks the gradient surgery state");
        };
        restored_optimizer.load_state(state).unwrap();
        let batches = TaskBatches::sample(&split, &mut restored_random.shuffle).unwrap();
        pcgrad_step(&restored, &mut restored_optimizer, &batches, &config, &mut restored_random).unwrap();

        for ((name, a), (_, b)) in model.state().parameters.iter().zip(&restored.state().parameters) {
            let identical = a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits());
            assert!(identical, "{name} diverged after resuming");
        }
        assert_eq!(random, restored_random);
    }

    #[test]
    fn test_same_seed_same_training() {
        let run = || {
            let dir = tempdir().unwrap();
            let config = tiny_config(&dir, TrainStrategy::Pcgrad);
            let split = tiny_split(&config);
            let mut random = RandomState::from_seed(config.seed);
            let model = model_for(&config, &mut random);
            let mut optimizer = PcGrad::new(adam_for(&model, &config), config.seed);
            for _ in 0..2 {
                let batches = TaskBatches::sample(&split, &mut random.shuffle).unwrap();
                pcgrad_step(&model, &mut optimizer, &batches, &config, &mut random).unwrap();
            }
            model.state()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_frozen_encoder_is_not_updated() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            fine_tune_mode: FineTuneMode::Frozen,
            ..tiny_config(&dir, TrainStrategy::Pcgrad)
        };
        let split = tiny_split(&config);
        let mut random = RandomState::from_seed(config.seed);
        let model = model_for(&config, &mut random);
        let before = model.state();
        let mut optimizer = PcGrad::new(adam_for(&model, &config), 0);
        let batches = TaskBatches::sample(&split, &mut TensorRng::seed_from_u64(0)).unwrap();
        pcgrad_step(&model, &mut optimizer, &batches, &config, &mut random).unwrap();

        let after = model.state();
        for ((name, a), (_, b)) in before.parameters.iter().zip(&after.parameters) {
            if name.starts_with("encoder") {
                assert_eq!(a, b, "{name} changed while frozen");
            }
        }
    }
}
