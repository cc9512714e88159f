//! Price calibration for rare items from a corpus of observed sales.
//!
//! [`CalibrationEngine`] answers "what is this item worth, and how sure
//! are we" by walking an estimator cascade. [`EngineHandle`] serves one
//! engine to many readers and swaps in rebuilt engines atomically.

pub mod archetype;
pub mod config;
pub mod demand;
pub mod distance;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod grade_median;
pub mod handle;
pub mod loader;
pub mod model;
pub mod modset;
pub mod neighbor;
pub mod regression;
pub mod ridge;
pub mod stats;
pub mod store;

pub use archetype::{ArchetypeScorer, PatternArchetypeScorer};
pub use config::CalibrationConfig;
pub use demand::{DemandIndex, StaticDemandIndex};
pub use engine::{CalibrationEngine, EngineBuilder, ProbeReport};
pub use error::{CalibrationError, PredictError, Result};
pub use handle::{EngineHandle, RefreshReport};
pub use model::{ConfidenceBand, EstimateSource, Grade, ItemFeatures, ItemQuery, PriceEstimate, Provenance, Sample};
pub use regression::{PriceModel, RegressionRegistry, RegressionTrainer, TrainedModel};
pub use ridge::RidgeTrainer;
