use thiserror::Error;

/// Errors that can occur in lattix-train.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid or inconsistent configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
    /// A split has no index for the requested query type.
    #[error("Index {index} not found for split '{split}'")]
    MissingIndex { split: String, index: String },
    /// Split not present in the dataset.
    #[error("Split not found: {0}")]
    MissingSplit(String),
    /// Operation not supported by the model or configuration.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),
    /// Malformed line in a fact file.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    /// Total cost became NaN or infinite; the run cannot continue.
    #[error("Cost became {cost} in epoch {epoch}, batch {batch}; aborting training job")]
    NumericalDivergence { epoch: usize, batch: usize, cost: f32 },
}

/// Result type alias for lattix-train.
pub type Result<T> = std::result::Result<T, Error>;
