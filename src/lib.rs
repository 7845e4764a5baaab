pub mod data;
pub mod error;
pub mod experiments;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod random;
pub mod tensor;

pub use error::{Result, TrainError};
pub use tensor::Tensor;
