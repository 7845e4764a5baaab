/// Multi-task fine-tuning of a shared encoder on sentiment classification,
/// paraphrase detection and semantic textual similarity.
///
/// The three task losses can be combined sequentially, by plain summation, or
/// with gradient surgery (see [`crate::optim::PcGrad`]).
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod evaluation;
pub mod loss;
pub mod model;
pub mod multitask_experiment;
pub mod training;
pub mod visualization;

pub use multitask_experiment::run_multitask_experiment;
