//! Error types for the calibration engine

use thiserror::Error;

/// Result type for calibration operations
pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Errors raised while loading, building or refreshing an engine.
///
/// Estimation itself never fails; lack of coverage is reported as an
/// estimate without a price.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Non-positive price {price} for item class '{item_class}'")]
    NonPositivePrice { item_class: String, price: f64 },

    #[error("Sample has an empty item class")]
    EmptyItemClass,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed corpus record on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Regression training failed: {0}")]
    Training(String),
}

impl From<toml::de::Error> for CalibrationError {
    fn from(err: toml::de::Error) -> Self {
        CalibrationError::Config(err.to_string())
    }
}

/// Failure of a single regression prediction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    #[error("Feature shape mismatch: expected {expected}, got {actual}")]
    FeatureShape { expected: usize, actual: usize },

    #[error("Model produced a non-finite prediction")]
    NonFinite,

    #[error("Model error: {0}")]
    Model(String),
}
