use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainError>;

#[derive(Error, Debug)]
pub enum TrainError {
    /// Wiring problems detected before any parameter is touched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A projection target had zero norm. Recovered by skipping the pair.
    #[error("degenerate gradient: task {reference} has a zero-norm gradient, projection of task {task} skipped")]
    DegenerateGradient { task: usize, reference: usize },

    #[error("loss of task {task} is not finite ({value})")]
    NonFiniteLoss { task: usize, value: f32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("plotting error: {0}")]
    Plot(String),
}

impl TrainError {
    pub fn configuration(message: impl Into<String>) -> Self {
        TrainError::Configuration(message.into())
    }

    /// Errors that the caller may recover from locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrainError::DegenerateGradient { .. })
    }
}
