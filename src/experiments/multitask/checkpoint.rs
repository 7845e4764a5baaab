use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::optim::{OptimizerState, PcGradState};
use crate::random::RandomState;

use super::config::{ModelConfig, TrainConfig};
use super::model::{ModelState, MultitaskModel};

/// Optimizer state of whichever strategy wrote the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SavedOptimizer {
    Base(OptimizerState),
    PcGrad(PcGradState),
}

/// Everything needed to rebuild a model for prediction or to resume training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub model: ModelState,
    pub optimizer: Option<SavedOptimizer>,
    pub config: TrainConfig,
    pub model_config: ModelConfig,
    pub random: RandomState,
    pub epoch: usize,
    pub best_dev_score: f32,
}

impl Checkpoint {
    pub fn capture(
        model: &MultitaskModel,
        optimizer: Option<SavedOptimizer>,
        config: &TrainConfig,
        random: &RandomState,
        epoch: usize,
        best_dev_score: f32,
    ) -> Checkpoint {
        Checkpoint {
            model: model.state(),
            optimizer,
            config: config.clone(),
            model_config: model.config().clone(),
            random: random.clone(),
            epoch,
            best_dev_score,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        info!(path = %path.display(), epoch = self.epoch, "saved checkpoint");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Checkpoint> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Rebuilds the model described by this checkpoint with its saved weights.
    pub fn restore_model(&self) -> Result<MultitaskModel> {
        let mut init = self.random.init.clone();
        let model = MultitaskModel::new(&self.model_config, &mut init)?;
        model.load_state(&self.model)?;
        Ok(model)
    }
}
