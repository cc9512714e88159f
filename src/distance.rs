use crate::config::DistanceWeights;
use crate::demand::DemandIndex;
use crate::model::{ItemQuery, Sample};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Query plus the derived values every comparison needs
#[derive(Debug, Clone, Copy)]
pub struct Probe<'a> {
    pub query: &'a ItemQuery,
    pub tier_score: f64,
}

impl<'a> Probe<'a> {
    pub fn new(query: &'a ItemQuery) -> Self {
        Self {
            query,
            tier_score: query.tier_score(),
        }
    }
}

/// Weighted contribution of each distance term
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistanceTerms {
    pub score: f64,
    pub grade: f64,
    pub dps: f64,
    pub defense: f64,
    pub top_tier: f64,
    pub mod_count: f64,
    pub mods: f64,
    pub base_type: f64,
    pub tier_score: f64,
}

impl DistanceTerms {
    pub fn total(&self) -> f64 {
        self.score
            + self.grade
            + self.dps
            + self.defense
            + self.top_tier
            + self.mod_count
            + self.mods
            + self.base_type
            + self.tier_score
    }
}

/// Weighted multi-term dissimilarity between a query and a sample.
/// Lower is more similar; every term is non-negative.
#[derive(Clone, Default)]
pub struct DistanceMetric {
    weights: DistanceWeights,
    demand: Option<Arc<dyn DemandIndex>>,
}

impl std::fmt::Debug for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceMetric")
            .field("weights", &self.weights)
            .field("demand", &self.demand.is_some())
            .finish()
    }
}

impl DistanceMetric {
    pub fn new(weights: DistanceWeights) -> Self {
        Self {
            weights,
            demand: None,
        }
    }

    pub fn with_demand(mut self, demand: Arc<dyn DemandIndex>) -> Self {
        self.demand = Some(demand);
        self
    }

    pub fn distance(&self, probe: &Probe<'_>, candidate: &Sample) -> f64 {
        self.terms(probe, candidate).total()
    }

    pub fn terms(&self, probe: &Probe<'_>, candidate: &Sample) -> DistanceTerms {
        let w = &self.weights;
        let q = probe.query;
        let s = &candidate.features;

        let mods = if !q.mod_stats.is_empty() && !s.mod_stats.is_empty() {
            stat_distance(&q.mod_stats, &s.mod_stats)
        } else {
            self.weighted_jaccard_distance(&q.item_class, &q.mod_groups, &s.mod_groups)
        };

        let base_type = match (q.base_type(), s.base_type()) {
            (Some(a), Some(b)) if a != b => w.base_type,
            _ => 0.0,
        };

        DistanceTerms {
            score: (q.score - s.score).abs() * w.score,
            grade: (q.grade.ordinal() as f64 - s.grade.ordinal() as f64).abs() * w.grade,
            dps: (q.dps_factor - s.dps_factor).abs() * w.dps,
            defense: (q.defense_factor - s.defense_factor).abs() * w.defense,
            top_tier: (q.top_tier_count as f64 - s.top_tier_count as f64).abs() * w.top_tier,
            mod_count: (q.mod_count as f64 - s.mod_count as f64).abs() * w.mod_count,
            mods: mods * w.mods,
            base_type,
            tier_score: (probe.tier_score - candidate.tier_score()).abs() * w.tier_score,
        }
    }

    fn group_weight(&self, item_class: &str, group: &str) -> f64 {
        1.0 + self
            .demand
            .as_ref()
            .map(|d| d.mod_demand(item_class, group).max(0.0))
            .unwrap_or(0.0)
    }

    /// 1 - weighted |A ∩ B| / weighted |A ∪ B|; 0.0 when both are empty
    pub fn weighted_jaccard_distance(
        &self,
        item_class: &str,
        a: &BTreeSet<String>,
        b: &BTreeSet<String>,
    ) -> f64 {
        let union: f64 = a.union(b).map(|g| self.group_weight(item_class, g)).sum();
        if union <= 0.0 {
            return 0.0;
        }
        let intersection: f64 = a.intersection(b).map(|g| self.group_weight(item_class, g)).sum();
        1.0 - intersection / union
    }
}

/// Mean per-stat relative difference; a stat present on one side only
/// counts as a full mismatch
pub fn stat_distance(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    if keys.is_empty() {
        return 0.0;
    }
    let total: f64 = keys
        .iter()
        .map(|k| match (a.get(*k), b.get(*k)) {
            (Some(x), Some(y)) => {
                let scale = x.abs().max(y.abs());
                if scale > 0.0 {
                    ((x - y).abs() / scale).min(1.0)
                } else {
                    0.0
                }
            }
            _ => 1.0,
        })
        .sum();
    total / keys.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::StaticDemandIndex;
    use crate::model::{Grade, ItemFeatures};
    use std::collections::HashMap;

    fn sample(features: ItemFeatures) -> Sample {
        Sample::new(features, 1.0)
    }

    fn set(groups: &[&str]) -> BTreeSet<String> {
        groups.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_items_have_zero_distance() {
        let f = ItemFeatures::new("Rings", 0.7)
            .with_mod_groups(["Life", "FireResist"])
            .with_base_type("Gold Ring")
            .with_mod_tiers([("life", 1)]);
        let metric = DistanceMetric::new(DistanceWeights::default());
        assert_eq!(metric.distance(&Probe::new(&f), &sample(f.clone())), 0.0);
    }

    #[test]
    fn terms_are_weighted_absolute_differences() {
        let weights = DistanceWeights::default();
        let metric = DistanceMetric::new(weights.clone());
        let q = ItemFeatures::new("Rings", 0.9).with_grade(Grade::A);
        let mut s = ItemFeatures::new("Rings", 0.4).with_grade(Grade::C);
        s.dps_factor = 1.5;
        s.top_tier_count = 2;
        s.mod_count = 6;

        let t = metric.terms(&Probe::new(&q), &sample(s));
        assert!((t.score - 0.5 * weights.score).abs() < 1e-12);
        assert!((t.grade - 2.0 * weights.grade).abs() < 1e-12);
        assert!((t.dps - 0.5 * weights.dps).abs() < 1e-12);
        assert_eq!(t.defense, 0.0);
        assert!((t.top_tier - 2.0 * weights.top_tier).abs() < 1e-12);
        assert!((t.mod_count - 2.0 * weights.mod_count).abs() < 1e-12);
        assert_eq!(t.mods, 0.0);
    }

    #[test]
    fn base_type_penalty_needs_both_sides() {
        let metric = DistanceMetric::new(DistanceWeights::default());
        let q = ItemFeatures::new("Rings", 0.5).with_base_type("Gold Ring");
        let other = ItemFeatures::new("Rings", 0.5).with_base_type("Iron Ring");
        let unset = ItemFeatures::new("Rings", 0.5);

        assert_eq!(metric.terms(&Probe::new(&q), &sample(other)).base_type, 0.3);
        assert_eq!(metric.terms(&Probe::new(&q), &sample(unset)).base_type, 0.0);
    }

    #[test]
    fn jaccard_distance_plain() {
        let metric = DistanceMetric::new(DistanceWeights::default());
        let d = metric.weighted_jaccard_distance("Rings", &set(&["A", "B"]), &set(&["B", "C"]));
        assert!((d - (1.0 - 1.0 / 3.0)).abs() < 1e-12);
        assert_eq!(metric.weighted_jaccard_distance("Rings", &set(&[]), &set(&[])), 0.0);
        assert_eq!(metric.weighted_jaccard_distance("Rings", &set(&["A"]), &set(&[])), 1.0);
    }

    #[test]
    fn demand_weights_shared_popular_mods() {
        let mut rings = HashMap::new();
        rings.insert("B".to_string(), 1.0);
        let mut index = HashMap::new();
        index.insert("Rings".to_string(), rings);
        let metric = DistanceMetric::new(DistanceWeights::default())
            .with_demand(Arc::new(StaticDemandIndex::new(index)));

        // shared B weighs 2, A and C weigh 1: 1 - 2/4
        let d = metric.weighted_jaccard_distance("Rings", &set(&["A", "B"]), &set(&["B", "C"]));
        assert!((d - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rolled_stats_replace_jaccard() {
        let metric = DistanceMetric::new(DistanceWeights::default());
        let mut q = ItemFeatures::new("Rings", 0.5).with_mod_groups(["A"]);
        q.mod_stats.insert("life".into(), 100.0);
        let mut s = ItemFeatures::new("Rings", 0.5).with_mod_groups(["B"]);
        s.mod_stats.insert("life".into(), 80.0);

        let t = metric.terms(&Probe::new(&q), &sample(s));
        assert!((t.mods - 0.2).abs() < 1e-12);
    }

    #[test]
    fn stat_distance_missing_stat_is_full_mismatch() {
        let a: BTreeMap<String, f64> = [("x".to_string(), 10.0)].into_iter().collect();
        let b: BTreeMap<String, f64> = [("y".to_string(), 10.0)].into_iter().collect();
        assert_eq!(stat_distance(&a, &b), 1.0);
        assert_eq!(stat_distance(&a, &a), 0.0);
    }
}
