use crate::config::CalibrationConfig;
use crate::demand::DemandIndex;
use crate::engine::{CalibrationEngine, EngineBuilder};
use crate::model::{ItemQuery, PriceEstimate, Sample};
use crate::regression::RegressionTrainer;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a refresh
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub samples: usize,
    pub rejected: usize,
    pub models: usize,
    /// Training error when the previous models were kept
    pub training_error: Option<String>,
}

/// Shared reference to the engine currently serving estimates.
///
/// Readers load the current engine without locking; a refresh builds a
/// complete replacement off to the side and swaps it in atomically.
pub struct EngineHandle {
    current: ArcSwap<CalibrationEngine>,
    demand: Option<Arc<dyn DemandIndex>>,
}

impl EngineHandle {
    pub fn new(engine: CalibrationEngine) -> Self {
        Self {
            current: ArcSwap::from_pointee(engine),
            demand: None,
        }
    }

    pub fn with_demand(mut self, demand: Arc<dyn DemandIndex>) -> Self {
        self.demand = Some(demand);
        self
    }

    pub fn current(&self) -> Arc<CalibrationEngine> {
        self.current.load_full()
    }

    pub fn estimate(&self, query: &ItemQuery) -> PriceEstimate {
        self.current.load().estimate(query)
    }

    /// Replace the engine with one built from `samples`.
    ///
    /// Samples with a non-positive price are skipped and counted. When
    /// training fails the new engine keeps serving the previous models.
    pub fn refresh<I>(
        &self,
        config: CalibrationConfig,
        samples: I,
        trainer: Option<&dyn RegressionTrainer>,
    ) -> RefreshReport
    where
        I: IntoIterator<Item = Sample>,
    {
        let previous = self.current();
        let mut builder = EngineBuilder::new(config)
            .with_archetypes(Arc::clone(previous.archetypes()))
            .with_registry(Arc::clone(previous.registry()));
        if let Some(demand) = &self.demand {
            builder = builder.with_demand(Arc::clone(demand));
        }

        let mut rejected = 0;
        for sample in samples {
            if builder.insert(sample).is_err() {
                rejected += 1;
            }
        }

        let training_error = match trainer {
            Some(trainer) => match builder.train_regression(trainer) {
                Ok(()) => None,
                Err(err) => {
                    warn!(error = %err, "regression training failed, keeping previous models");
                    Some(err.to_string())
                }
            },
            None => None,
        };

        let engine = builder.build();
        let report = RefreshReport {
            samples: engine.store().len(),
            rejected,
            models: engine.registry().len(),
            training_error,
        };
        self.current.store(Arc::new(engine));
        info!(samples = report.samples, rejected, models = report.models, "calibration engine swapped");
        report
    }
}
