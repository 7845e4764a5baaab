pub mod adam;
pub mod optimizer;
pub mod pcgrad;
pub mod sgd;

pub use adam::AdamOptimizer;
pub use optimizer::{Optimizer, OptimizerState};
pub use pcgrad::{project_conflicting, PcGrad, PcGradState, SurgeryReport, SurgeryStep, TaskGradient};
pub use sgd::SGDOptimizer;
