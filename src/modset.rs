//! Exact-modset price lookup.
//!
//! Items sharing an item class and the exact same set of mod groups are
//! bucketed together. A bucket only prices a query when it is large
//! enough, internally consistent (bounded log-price spread), and still
//! holds enough entries after filtering to the query's tier score and
//! stat-value neighbourhood.

use crate::config::{ModsetAggregate, ModsetConfig};
use crate::model::ItemQuery;
use crate::stats::{self, Distribution};
use crate::store::SampleStore;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

pub type ModsetKey = (String, BTreeSet<String>);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModsetEntry {
    pub log_price: f64,
    pub tier_score: f64,
    pub somv_factor: f64,
    pub weight: f64,
}

/// Why a lookup did or did not produce a price
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModsetOutcome {
    Estimate(f64),
    NoModGroups,
    MissingKey,
    TooFewEntries(usize),
    SpreadTooWide(f64),
    TierFiltered(usize),
    SomvFiltered(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ModsetCoverage {
    pub total_keys: usize,
    pub keys_ge3: usize,
    pub keys_ge5: usize,
    pub keys_ge10: usize,
    pub entry_counts: Distribution,
}

#[derive(Debug, Default)]
pub struct ModsetIndex {
    config: ModsetConfig,
    buckets: HashMap<ModsetKey, Vec<ModsetEntry>>,
}

impl ModsetIndex {
    pub fn build(store: &SampleStore, config: ModsetConfig) -> Self {
        let mut buckets: HashMap<ModsetKey, Vec<ModsetEntry>> = HashMap::new();
        for sample in store.samples() {
            if sample.features.mod_groups.is_empty() {
                continue;
            }
            let key = (
                sample.features.item_class.clone(),
                sample.features.mod_groups.clone(),
            );
            buckets.entry(key).or_default().push(ModsetEntry {
                log_price: sample.price.ln(),
                tier_score: sample.tier_score(),
                somv_factor: sample.features.somv_factor,
                weight: sample.weight(),
            });
        }
        Self { config, buckets }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Exact-key estimate, `None` unless every filter passes
    pub fn estimate(&self, query: &ItemQuery) -> Option<f64> {
        match self.diagnose(query) {
            ModsetOutcome::Estimate(price) => Some(price),
            _ => None,
        }
    }

    /// Drop-one-affix fallback, tried in sorted mod-group order.
    ///
    /// Only consulted when enabled in config and the query carries
    /// enough mod groups.
    pub fn estimate_fuzzy(&self, query: &ItemQuery) -> Option<f64> {
        if !self.config.fuzzy || query.mod_groups.len() < self.config.fuzzy_min_groups {
            return None;
        }
        query.mod_groups.iter().find_map(|dropped| {
            let mut subset = query.mod_groups.clone();
            subset.remove(dropped);
            match self.lookup(query, &subset) {
                ModsetOutcome::Estimate(price) => Some(price),
                _ => None,
            }
        })
    }

    pub fn diagnose(&self, query: &ItemQuery) -> ModsetOutcome {
        self.lookup(query, &query.mod_groups)
    }

    fn lookup(&self, query: &ItemQuery, mod_groups: &BTreeSet<String>) -> ModsetOutcome {
        if mod_groups.is_empty() {
            return ModsetOutcome::NoModGroups;
        }
        let key = (query.item_class.clone(), mod_groups.clone());
        let Some(entries) = self.buckets.get(&key) else {
            return ModsetOutcome::MissingKey;
        };
        let min = self.config.min_entries;
        if entries.len() < min {
            return ModsetOutcome::TooFewEntries(entries.len());
        }

        let log_prices: Vec<f64> = entries.iter().map(|e| e.log_price).collect();
        let spread = stats::spread(&log_prices);
        if spread > self.config.max_log_spread {
            return ModsetOutcome::SpreadTooWide(spread);
        }

        // Without tier information there is nothing to narrow by
        let kept: Vec<&ModsetEntry> = if query.has_tiers() {
            let tier_score = query.tier_score();
            let near_tier: Vec<&ModsetEntry> = entries
                .iter()
                .filter(|e| (e.tier_score - tier_score).abs() <= self.config.tier_tolerance)
                .collect();
            if near_tier.len() < min {
                return ModsetOutcome::TierFiltered(near_tier.len());
            }
            let near_somv: Vec<&ModsetEntry> = near_tier
                .into_iter()
                .filter(|e| (e.somv_factor - query.somv_factor).abs() <= self.config.somv_tolerance)
                .collect();
            if near_somv.len() < min {
                return ModsetOutcome::SomvFiltered(near_somv.len());
            }
            near_somv
        } else {
            entries.iter().collect()
        };

        let pairs: Vec<(f64, f64)> = kept.iter().map(|e| (e.log_price, e.weight)).collect();
        let center = match self.config.aggregate {
            ModsetAggregate::Median => stats::weighted_median(&pairs),
            ModsetAggregate::Mean => stats::weighted_mean(&pairs),
        };
        match center {
            Some(log_price) => ModsetOutcome::Estimate(log_price.exp()),
            None => ModsetOutcome::TooFewEntries(0),
        }
    }

    pub fn coverage(&self) -> ModsetCoverage {
        let sizes: Vec<f64> = self.buckets.values().map(|v| v.len() as f64).collect();
        let count_at_least = |n: usize| self.buckets.values().filter(|v| v.len() >= n).count();
        ModsetCoverage {
            total_keys: self.buckets.len(),
            keys_ge3: count_at_least(3),
            keys_ge5: count_at_least(5),
            keys_ge10: count_at_least(10),
            entry_counts: stats::distribution(&sizes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemFeatures, Sample};

    const MODS: [&str; 3] = ["IncreasedLife", "FireResist", "ColdResist"];

    fn features() -> ItemFeatures {
        ItemFeatures::new("Rings", 0.5)
            .with_mod_groups(MODS)
            .with_mod_tiers([("life", 1), ("fire", 2)])
    }

    fn index_with(prices: &[f64], config: ModsetConfig) -> ModsetIndex {
        let mut store = SampleStore::new();
        for &p in prices {
            store.insert(Sample::new(features(), p)).unwrap();
        }
        ModsetIndex::build(&store, config)
    }

    #[test]
    fn identical_prices_return_that_price() {
        let index = index_with(&[10.0; 5], ModsetConfig::default());
        let est = index.estimate(&features()).unwrap();
        assert!((est - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_than_three_entries_is_no_result() {
        let index = index_with(&[10.0, 10.0], ModsetConfig::default());
        assert_eq!(index.diagnose(&features()), ModsetOutcome::TooFewEntries(2));
        assert_eq!(index.estimate(&features()), None);
    }

    #[test]
    fn spread_boundary() {
        let below = index_with(&[1.0, 1.0, 2.19f64.exp()], ModsetConfig::default());
        assert!(below.estimate(&features()).is_some());

        let above = index_with(&[1.0, 1.0, 2.21f64.exp()], ModsetConfig::default());
        assert!(matches!(above.diagnose(&features()), ModsetOutcome::SpreadTooWide(_)));
    }

    #[test]
    fn mixed_bucket_is_rejected() {
        let index = index_with(&[1.0, 1.0, 1.0, 50.0, 50.0], ModsetConfig::default());
        assert_eq!(index.estimate(&features()), None);
    }

    #[test]
    fn median_of_filtered_entries() {
        let index = index_with(&[2.0, 3.0, 4.0, 5.0], ModsetConfig::default());
        // median of ln prices: (ln 3 + ln 4) / 2 = ln sqrt(12)
        let est = index.estimate(&features()).unwrap();
        assert!((est - 12f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn mean_aggregate_is_selectable() {
        let config = ModsetConfig {
            aggregate: ModsetAggregate::Mean,
            ..ModsetConfig::default()
        };
        let index = index_with(&[1.0, 2.0, 4.0], config);
        // geometric mean of 1, 2, 4
        let est = index.estimate(&features()).unwrap();
        assert!((est - 2.0).abs() < 1e-9);
    }

    #[test]
    fn tier_filter_requires_nearby_entries() {
        let index = index_with(&[10.0; 4], ModsetConfig::default());
        // sample tier score is 1.5; 3.0 is beyond the ±1.0 tolerance
        let query = features().with_mod_tiers([("a", 1), ("b", 1), ("c", 1)]);
        assert_eq!(index.diagnose(&query), ModsetOutcome::TierFiltered(0));
    }

    #[test]
    fn somv_filter_requires_nearby_entries() {
        let index = index_with(&[10.0; 4], ModsetConfig::default());
        let query = features().with_somv_factor(1.5);
        assert_eq!(index.diagnose(&query), ModsetOutcome::SomvFiltered(0));

        let close = features().with_somv_factor(1.25);
        assert!(index.estimate(&close).is_some());
    }

    #[test]
    fn query_without_tiers_skips_filters() {
        let index = index_with(&[10.0; 3], ModsetConfig::default());
        let mut query = features().with_somv_factor(3.0);
        query.mod_tiers.clear();
        assert!(index.estimate(&query).is_some());
    }

    #[test]
    fn different_class_or_modset_misses() {
        let index = index_with(&[10.0; 3], ModsetConfig::default());
        let mut other_class = features();
        other_class.item_class = "Amulets".into();
        assert_eq!(index.diagnose(&other_class), ModsetOutcome::MissingKey);

        let subset = features().with_mod_groups(["IncreasedLife", "FireResist"]);
        assert_eq!(index.diagnose(&subset), ModsetOutcome::MissingKey);

        let none = features().with_mod_groups(Vec::<String>::new());
        assert_eq!(index.diagnose(&none), ModsetOutcome::NoModGroups);
    }

    #[test]
    fn fuzzy_drops_one_affix_when_enabled() {
        let config = ModsetConfig {
            fuzzy: true,
            ..ModsetConfig::default()
        };
        let index = index_with(&[7.0; 3], config);
        let query = features().with_mod_groups(["IncreasedLife", "FireResist", "ColdResist", "Strength"]);
        assert_eq!(index.estimate(&query), None);
        let est = index.estimate_fuzzy(&query).unwrap();
        assert!((est - 7.0).abs() < 1e-9);

        let disabled = index_with(&[7.0; 3], ModsetConfig::default());
        assert_eq!(disabled.estimate_fuzzy(&query), None);
    }

    #[test]
    fn coverage_counts_keys() {
        let index = index_with(&[1.0; 5], ModsetConfig::default());
        let cov = index.coverage();
        assert_eq!(cov.total_keys, 1);
        assert_eq!(cov.keys_ge3, 1);
        assert_eq!(cov.keys_ge5, 1);
        assert_eq!(cov.keys_ge10, 0);
        assert_eq!(cov.entry_counts.max, 5.0);
    }
}
