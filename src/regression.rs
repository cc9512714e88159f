//! Per-class regression models.
//!
//! Models are trained elsewhere (see [`RegressionTrainer`]) and only
//! called here. A failing prediction, including a panic inside the
//! model, degrades to "no estimate" for that call.

use crate::archetype::ArchetypeScorer;
use crate::error::{PredictError, Result};
use crate::model::{Grade, ItemQuery, Sample};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

/// Named feature record handed to a price model
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionFeatures {
    pub item_class: String,
    pub grade: Grade,
    pub score: f64,
    pub top_tier_count: u32,
    pub mod_count: u32,
    pub dps_factor: f64,
    pub defense_factor: f64,
    pub somv_factor: f64,
    pub tier_score: f64,
    pub best_tier: u32,
    pub avg_tier: f64,
    pub archetype_scores: BTreeMap<String, f64>,
    pub mod_groups: BTreeSet<String>,
    pub base_type: Option<String>,
    pub mod_tiers: BTreeMap<String, u32>,
    pub mod_rolls: BTreeMap<String, f64>,
    pub pdps: f64,
    pub edps: f64,
    pub mod_stats: BTreeMap<String, f64>,
    pub quality: u32,
    pub sockets: u32,
    pub corrupted: bool,
    pub open_prefixes: u32,
    pub open_suffixes: u32,
}

impl RegressionFeatures {
    pub fn from_query(query: &ItemQuery, archetypes: &dyn ArchetypeScorer) -> Self {
        Self {
            item_class: query.item_class.clone(),
            grade: query.grade,
            score: query.score,
            top_tier_count: query.top_tier_count,
            mod_count: query.mod_count,
            dps_factor: query.dps_factor,
            defense_factor: query.defense_factor,
            somv_factor: query.somv_factor,
            tier_score: query.tier_score(),
            best_tier: query.best_tier(),
            avg_tier: query.avg_tier(),
            archetype_scores: archetypes.scores(&query.mod_groups),
            mod_groups: query.mod_groups.clone(),
            base_type: query.base_type().map(str::to_string),
            mod_tiers: query.mod_tiers.clone(),
            mod_rolls: query.mod_rolls.clone(),
            pdps: query.pdps,
            edps: query.edps,
            mod_stats: query.mod_stats.clone(),
            quality: query.quality,
            sockets: query.sockets,
            corrupted: query.corrupted,
            open_prefixes: query.open_prefixes,
            open_suffixes: query.open_suffixes,
        }
    }
}

/// Opaque trained predictor; returns the natural log of the price
pub trait PriceModel: Send + Sync {
    fn predict_log_price(&self, features: &RegressionFeatures) -> std::result::Result<f64, PredictError>;
}

/// A trained model plus its diagnostics
#[derive(Clone)]
pub struct TrainedModel {
    pub model: Arc<dyn PriceModel>,
    pub n_train: usize,
    pub r2_cv: f64,
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("n_train", &self.n_train)
            .field("r2_cv", &self.r2_cv)
            .finish()
    }
}

/// One observation handed to a trainer
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub features: RegressionFeatures,
    pub price: f64,
    pub sale_confidence: f64,
}

/// Fits per-class models from grouped rows. The whole run succeeds or
/// fails; a partial result is never adopted.
pub trait RegressionTrainer: Send + Sync {
    fn train(&self, batches: &BTreeMap<String, Vec<TrainingRow>>) -> Result<HashMap<String, TrainedModel>>;
}

/// Group store samples by item class into trainer rows
pub fn training_batches(samples: &[Sample], archetypes: &dyn ArchetypeScorer) -> BTreeMap<String, Vec<TrainingRow>> {
    let mut batches: BTreeMap<String, Vec<TrainingRow>> = BTreeMap::new();
    for sample in samples {
        batches
            .entry(sample.features.item_class.clone())
            .or_default()
            .push(TrainingRow {
                features: RegressionFeatures::from_query(&sample.features, archetypes),
                price: sample.price,
                sale_confidence: sample.weight(),
            });
    }
    batches
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionPrediction {
    pub price: f64,
    pub r2_cv: f64,
    pub n_train: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RegressionRegistry {
    models: HashMap<String, TrainedModel>,
}

impl RegressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_models(models: HashMap<String, TrainedModel>) -> Self {
        for (class, m) in &models {
            info!(item_class = %class, n_train = m.n_train, r2_cv = m.r2_cv, "regression model attached");
        }
        Self { models }
    }

    /// Run a trainer over the samples; errors leave nothing half-built
    pub fn train(
        trainer: &dyn RegressionTrainer,
        samples: &[Sample],
        archetypes: &dyn ArchetypeScorer,
    ) -> Result<Self> {
        let batches = training_batches(samples, archetypes);
        let models = trainer.train(&batches)?;
        Ok(Self::from_models(models))
    }

    pub fn insert(&mut self, item_class: impl Into<String>, model: TrainedModel) {
        self.models.insert(item_class.into(), model);
    }

    pub fn get(&self, item_class: &str) -> Option<&TrainedModel> {
        self.models.get(item_class)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Price from the class model. `None` when the item has no mod
    /// groups, the class has no model, or the model fails.
    pub fn predict(&self, features: &RegressionFeatures) -> Option<RegressionPrediction> {
        if features.mod_groups.is_empty() {
            return None;
        }
        let trained = self.models.get(&features.item_class)?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| trained.model.predict_log_price(features)));
        let log_price = match outcome {
            Ok(Ok(v)) => v,
            Ok(Err(err)) => {
                debug!(item_class = %features.item_class, error = %err, "regression prediction failed");
                return None;
            }
            Err(_) => {
                debug!(item_class = %features.item_class, "regression model panicked");
                return None;
            }
        };
        let price = log_price.exp();
        if !price.is_finite() || price <= 0.0 {
            debug!(item_class = %features.item_class, log_price, "regression prediction out of range");
            return None;
        }
        Some(RegressionPrediction {
            price,
            r2_cv: trained.r2_cv,
            n_train: trained.n_train,
        })
    }
}
