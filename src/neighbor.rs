//! Distance-weighted k-nearest-neighbor pricing.
//!
//! The class pool is used when it holds at least `min_class_samples`
//! samples, otherwise the whole store is used when it holds at least
//! `min_global_samples`. Neighbors are averaged in log-price space,
//! weighted by sale confidence over distance.

use crate::config::NeighborConfig;
use crate::distance::{DistanceMetric, Probe};
use crate::model::ItemQuery;
use crate::store::SampleStore;
use rayon::prelude::*;
use serde::Serialize;
use tracing::trace;

/// Keeps an exact match from taking all the weight
const DISTANCE_EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolScope {
    Class,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NeighborEstimate {
    pub price: f64,
    /// In [0, 1]; grows as the nearest neighbor gets closer and as the
    /// pool fills more of the k slots
    pub confidence: f64,
    pub scope: PoolScope,
    pub nearest_distance: f64,
    pub neighbors: usize,
}

#[derive(Debug, Clone)]
pub struct NeighborInterpolator {
    config: NeighborConfig,
    metric: DistanceMetric,
}

impl NeighborInterpolator {
    pub fn new(config: NeighborConfig, metric: DistanceMetric) -> Self {
        Self { config, metric }
    }

    pub fn metric(&self) -> &DistanceMetric {
        &self.metric
    }

    /// Pool the query would be priced against, if any qualifies
    pub fn select_pool(&self, store: &SampleStore, item_class: &str) -> Option<PoolScope> {
        if store.class_len(item_class) >= self.config.min_class_samples {
            Some(PoolScope::Class)
        } else if store.len() >= self.config.min_global_samples {
            Some(PoolScope::Global)
        } else {
            None
        }
    }

    pub fn estimate(&self, store: &SampleStore, query: &ItemQuery) -> Option<NeighborEstimate> {
        let scope = self.select_pool(store, &query.item_class)?;
        self.estimate_in(store, scope, query)
    }

    /// Price against a specific pool, bypassing the size policy
    pub fn estimate_in(
        &self,
        store: &SampleStore,
        scope: PoolScope,
        query: &ItemQuery,
    ) -> Option<NeighborEstimate> {
        let probe = Probe::new(query);
        let samples = store.samples();

        let mut scored: Vec<(f64, usize)> = match scope {
            PoolScope::Class => store
                .class_indices(&query.item_class)
                .par_iter()
                .map(|&i| (self.metric.distance(&probe, &samples[i]), i))
                .collect(),
            PoolScope::Global => samples
                .par_iter()
                .enumerate()
                .map(|(i, s)| (self.metric.distance(&probe, s), i))
                .collect(),
        };
        scored.retain(|(d, _)| d.is_finite());
        if scored.is_empty() {
            return None;
        }
        // Insertion order breaks distance ties so results never depend on scheduling
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(self.config.k);

        let (log_sum, weight_sum) = scored.iter().fold((0.0, 0.0), |(ls, ws), &(d, i)| {
            let sample = &samples[i];
            let w = sample.weight() / (d + DISTANCE_EPSILON);
            (ls + w * sample.price.ln(), ws + w)
        });
        if weight_sum <= 0.0 {
            return None;
        }

        let nearest = scored[0].0;
        let confidence = self.confidence(nearest, scored.len());
        let price = (log_sum / weight_sum).exp();
        trace!(?scope, nearest, confidence, price, "neighbor estimate");

        Some(NeighborEstimate {
            price,
            confidence,
            scope,
            nearest_distance: nearest,
            neighbors: scored.len(),
        })
    }

    /// Depends on the query only through `nearest`, so for a fixed pool a
    /// closer nearest neighbor never lowers confidence. `selected` is the
    /// pool's support: how many of the k slots it could fill.
    fn confidence(&self, nearest: f64, selected: usize) -> f64 {
        let proximity = 1.0 / (1.0 + nearest / self.config.distance_scale);
        let support = (selected as f64 / self.config.k as f64).min(1.0);
        (proximity * (0.5 + 0.5 * support)).clamp(0.0, 1.0)
    }
}
