use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Generator used for every stochastic tensor operation in the crate.
pub type TensorRng = ChaCha8Rng;

/// Owned random state of a training run.
///
/// Each consumer draws from its own stream so that, for example, changing the
/// batch size does not change the dropout masks of an unrelated head. The whole
/// struct is serialized into checkpoints; restoring it resumes every stream at
/// the exact word it stopped at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomState {
    /// Data loader shuffling and random batch sampling.
    pub shuffle: TensorRng,
    /// Parameter initialization.
    pub init: TensorRng,
    /// Dropout masks.
    pub dropout: TensorRng,
}

impl RandomState {
    pub fn from_seed(seed: u64) -> RandomState {
        // Distinct streams of the same key keep the three sequences independent.
        let mut shuffle = ChaCha8Rng::seed_from_u64(seed);
        shuffle.set_stream(0);
        let mut init = ChaCha8Rng::seed_from_u64(seed);
        init.set_stream(1);
        let mut dropout = ChaCha8Rng::seed_from_u64(seed);
        dropout.set_stream(2);
        RandomState {
            shuffle,
            init,
            dropout,
        }
    }
}
