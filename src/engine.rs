//! Calibration engine: builder and estimator cascade.
//!
//! Estimators are probed in decreasing order of expected precision:
//! exact modset, regression model, k-NN (class pool, else global pool),
//! grade median. Each estimator owns a confidence band and the bands do
//! not overlap, so the first estimator that answers is also the most
//! confident one.

use crate::archetype::{ArchetypeScorer, PatternArchetypeScorer};
use crate::config::{CalibrationConfig, RegressionConfig};
use crate::demand::DemandIndex;
use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::grade_median::{GradeMedian, GradeMedianIndex};
use crate::model::{EstimateSource, ItemQuery, PriceEstimate, Sample};
use crate::modset::ModsetIndex;
use crate::neighbor::{NeighborEstimate, NeighborInterpolator, PoolScope};
use crate::regression::{RegressionFeatures, RegressionPrediction, RegressionRegistry, RegressionTrainer};
use crate::store::SampleStore;
use std::sync::Arc;
use tracing::{debug, info};

const MODSET_CONFIDENCE: f64 = 0.85;
const FUZZY_MODSET_CONFIDENCE: f64 = 0.75;
const GRADE_MEDIAN_CONFIDENCE: f64 = 0.1;
const THIN_GRADE_MEDIAN_CONFIDENCE: f64 = 0.05;
/// Width of the class and global k-NN bands; keeps them below the next band up
const NEIGHBOR_BAND_WIDTH: f64 = 0.19;

/// Collects samples and collaborators, then freezes them into an engine
pub struct EngineBuilder {
    config: CalibrationConfig,
    store: SampleStore,
    registry: Arc<RegressionRegistry>,
    demand: Option<Arc<dyn DemandIndex>>,
    archetypes: Arc<dyn ArchetypeScorer>,
}

impl EngineBuilder {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            store: SampleStore::new(),
            registry: Arc::new(RegressionRegistry::new()),
            demand: None,
            archetypes: Arc::new(PatternArchetypeScorer::default()),
        }
    }

    /// Add one sample; non-positive prices are rejected
    pub fn insert(&mut self, sample: Sample) -> Result<()> {
        self.store.insert(sample)
    }

    /// Insert every sample, stopping at the first rejected one
    pub fn extend<I>(&mut self, samples: I) -> Result<()>
    where
        I: IntoIterator<Item = Sample>,
    {
        samples.into_iter().try_for_each(|s| self.insert(s))
    }

    pub fn with_demand(mut self, demand: Arc<dyn DemandIndex>) -> Self {
        self.demand = Some(demand);
        self
    }

    pub fn with_archetypes(mut self, archetypes: Arc<dyn ArchetypeScorer>) -> Self {
        self.archetypes = archetypes;
        self
    }

    pub fn with_registry(mut self, registry: Arc<RegressionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Train models over the inserted samples. On failure the current
    /// registry is kept untouched and the error returned.
    pub fn train_regression(&mut self, trainer: &dyn RegressionTrainer) -> Result<()> {
        let registry = RegressionRegistry::train(trainer, self.store.samples(), self.archetypes.as_ref())?;
        self.registry = Arc::new(registry);
        Ok(())
    }

    pub fn build(self) -> CalibrationEngine {
        let modset = ModsetIndex::build(&self.store, self.config.modset.clone());
        let grade_median = GradeMedianIndex::build(&self.store);

        let mut metric = DistanceMetric::new(self.config.distance.clone());
        if let Some(demand) = self.demand {
            metric = metric.with_demand(demand);
        }
        let neighbors = NeighborInterpolator::new(self.config.neighbors.clone(), metric);

        info!(
            samples = self.store.len(),
            classes = self.store.class_count(),
            modset_keys = modset.len(),
            models = self.registry.len(),
            "calibration engine built"
        );
        for (class, samples) in self.store.class_sizes() {
            debug!(item_class = class, samples, "class pool");
        }

        CalibrationEngine {
            config: self.config,
            store: self.store,
            modset,
            grade_median,
            registry: self.registry,
            neighbors,
            archetypes: self.archetypes,
        }
    }
}

/// Every estimator's standalone answer for one query
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub modset: Option<f64>,
    pub fuzzy_modset: Option<f64>,
    pub regression: Option<RegressionPrediction>,
    pub neighbors: Option<NeighborEstimate>,
    pub grade_median: Option<GradeMedian>,
}

/// Immutable once built; safe to share across threads
pub struct CalibrationEngine {
    config: CalibrationConfig,
    store: SampleStore,
    modset: ModsetIndex,
    grade_median: GradeMedianIndex,
    registry: Arc<RegressionRegistry>,
    neighbors: NeighborInterpolator,
    archetypes: Arc<dyn ArchetypeScorer>,
}

impl CalibrationEngine {
    pub fn builder(config: CalibrationConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine with no samples; every estimate comes back empty
    pub fn empty(config: CalibrationConfig) -> Self {
        EngineBuilder::new(config).build()
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn modset(&self) -> &ModsetIndex {
        &self.modset
    }

    pub fn registry(&self) -> &Arc<RegressionRegistry> {
        &self.registry
    }

    pub fn neighbors(&self) -> &NeighborInterpolator {
        &self.neighbors
    }

    pub fn archetypes(&self) -> &Arc<dyn ArchetypeScorer> {
        &self.archetypes
    }

    /// Price and confidence from the first estimator that answers
    pub fn estimate(&self, query: &ItemQuery) -> PriceEstimate {
        if !query.mod_groups.is_empty() {
            if let Some(price) = self.modset.estimate(query) {
                return PriceEstimate::new(price, MODSET_CONFIDENCE, EstimateSource::Modset);
            }
            if let Some(price) = self.modset.estimate_fuzzy(query) {
                return PriceEstimate::new(price, FUZZY_MODSET_CONFIDENCE, EstimateSource::FuzzyModset);
            }
        }

        if let Some(prediction) = self.regression_probe(query) {
            if let Some(confidence) = regression_confidence(&self.config.regression, prediction.r2_cv) {
                return PriceEstimate::new(prediction.price, confidence, EstimateSource::Regression);
            }
        }

        if let Some(knn) = self.neighbors.estimate(&self.store, query) {
            let (floor, source) = match knn.scope {
                PoolScope::Class => (0.3, EstimateSource::NeighborsClass),
                PoolScope::Global => (0.1, EstimateSource::NeighborsGlobal),
            };
            return PriceEstimate::new(knn.price, floor + NEIGHBOR_BAND_WIDTH * knn.confidence, source);
        }

        if let Some(median) = self.grade_median.estimate(&query.item_class, query.grade) {
            let confidence = if median.samples >= self.config.grade_median.min_samples {
                GRADE_MEDIAN_CONFIDENCE
            } else {
                THIN_GRADE_MEDIAN_CONFIDENCE
            };
            return PriceEstimate::new(median.price, confidence, EstimateSource::GradeMedian);
        }

        PriceEstimate::none()
    }

    /// Run every estimator independently, for diagnostics
    pub fn probe_all(&self, query: &ItemQuery) -> ProbeReport {
        ProbeReport {
            modset: self.modset.estimate(query),
            fuzzy_modset: self.modset.estimate_fuzzy(query),
            regression: self.regression_probe(query),
            neighbors: self.neighbors.estimate(&self.store, query),
            grade_median: self.grade_median.estimate(&query.item_class, query.grade),
        }
    }

    fn regression_probe(&self, query: &ItemQuery) -> Option<RegressionPrediction> {
        if query.mod_groups.is_empty() || self.registry.get(&query.item_class).is_none() {
            return None;
        }
        let features = RegressionFeatures::from_query(query, self.archetypes.as_ref());
        self.registry.predict(&features)
    }
}

/// Confidence for a regression answer, `None` when the model's
/// cross-validated r² is too weak to use
fn regression_confidence(config: &RegressionConfig, r2_cv: f64) -> Option<f64> {
    if !r2_cv.is_finite() {
        return None;
    }
    if r2_cv >= config.high_r2 {
        let span = (1.0 - config.high_r2).max(f64::EPSILON);
        Some(0.75 + 0.2 * ((r2_cv - config.high_r2) / span).clamp(0.0, 1.0))
    } else if r2_cv >= config.min_r2 {
        let span = (config.high_r2 - config.min_r2).max(f64::EPSILON);
        Some(0.5 + 0.24 * ((r2_cv - config.min_r2) / span).clamp(0.0, 1.0))
    } else {
        debug!(r2_cv, "regression model below minimum r2, skipped");
        None
    }
}
