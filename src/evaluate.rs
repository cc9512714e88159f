//! Holdout accuracy of the estimator cascade, plus the modset coverage
//! and estimator disagreement diagnostics gathered over the same holdout.

use crate::engine::{CalibrationEngine, ProbeReport};
use crate::model::{ConfidenceBand, EstimateSource, Grade, Sample};
use crate::modset::{ModsetCoverage, ModsetOutcome};
use crate::neighbor::PoolScope;
use crate::stats;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Accuracy {
    pub count: usize,
    pub within_2x: f64,
    pub within_3x: f64,
    pub median_ratio: f64,
}

impl Accuracy {
    fn from_ratios(ratios: &[f64]) -> Self {
        if ratios.is_empty() {
            return Accuracy::default();
        }
        let n = ratios.len() as f64;
        Accuracy {
            count: ratios.len(),
            within_2x: ratios.iter().filter(|r| **r <= 2.0).count() as f64 / n,
            within_3x: ratios.iter().filter(|r| **r <= 3.0).count() as f64 / n,
            median_ratio: stats::median(ratios).unwrap_or(f64::INFINITY),
        }
    }
}

/// Estimators further apart than this factor count as disagreeing
const DISAGREEMENT_RATIO: f64 = 3.0;
/// Worst disagreements kept in the report
const MAX_REPORTED_DISAGREEMENTS: usize = 20;

/// Where holdout queries with mod groups ended up in the modset index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModsetFilterCounts {
    pub with_mod_groups: usize,
    pub answered: usize,
    pub missing_key: usize,
    pub too_few_entries: usize,
    pub spread_too_wide: usize,
    pub tier_filtered: usize,
    pub somv_filtered: usize,
    /// Exact lookup failed but a drop-one subset priced the item
    pub fuzzy_answered: usize,
}

impl ModsetFilterCounts {
    fn record(&mut self, outcome: ModsetOutcome, fuzzy: bool) {
        if outcome == ModsetOutcome::NoModGroups {
            return;
        }
        self.with_mod_groups += 1;
        match outcome {
            ModsetOutcome::Estimate(_) => self.answered += 1,
            ModsetOutcome::NoModGroups => {}
            ModsetOutcome::MissingKey => self.missing_key += 1,
            ModsetOutcome::TooFewEntries(_) => self.too_few_entries += 1,
            ModsetOutcome::SpreadTooWide(_) => self.spread_too_wide += 1,
            ModsetOutcome::TierFiltered(_) => self.tier_filtered += 1,
            ModsetOutcome::SomvFiltered(_) => self.somv_filtered += 1,
        }
        if fuzzy {
            self.fuzzy_answered += 1;
        }
    }
}

/// Holdout item whose standalone estimates spread wider than
/// `DISAGREEMENT_RATIO`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Disagreement {
    pub item_class: String,
    pub grade: Grade,
    pub actual: f64,
    pub ratio: f64,
    pub estimates: Vec<(EstimateSource, f64)>,
}

impl Disagreement {
    fn from_probe(sample: &Sample, probe: &ProbeReport) -> Option<Self> {
        let mut estimates = Vec::new();
        if let Some(price) = probe.modset {
            estimates.push((EstimateSource::Modset, price));
        }
        if let Some(prediction) = &probe.regression {
            estimates.push((EstimateSource::Regression, prediction.price));
        }
        if let Some(knn) = &probe.neighbors {
            let source = match knn.scope {
                PoolScope::Class => EstimateSource::NeighborsClass,
                PoolScope::Global => EstimateSource::NeighborsGlobal,
            };
            estimates.push((source, knn.price));
        }
        if estimates.len() < 2 {
            return None;
        }
        let prices: Vec<f64> = estimates.iter().map(|(_, p)| *p).collect();
        let high = prices.iter().copied().fold(f64::MIN, f64::max);
        let low = prices.iter().copied().fold(f64::MAX, f64::min);
        let ratio = high / low.max(0.01);
        (ratio > DISAGREEMENT_RATIO).then(|| Disagreement {
            item_class: sample.features.item_class.clone(),
            grade: sample.features.grade,
            actual: sample.price,
            ratio,
            estimates,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    pub total: usize,
    pub unanswered: usize,
    pub overall: Accuracy,
    pub by_source: BTreeMap<EstimateSource, Accuracy>,
    pub by_band: BTreeMap<ConfidenceBand, Accuracy>,
    pub modset_coverage: ModsetCoverage,
    pub modset_filters: ModsetFilterCounts,
    pub disagreement_count: usize,
    /// Largest ratios first
    pub disagreements: Vec<Disagreement>,
}

struct HoldoutOutcome {
    answer: Option<(EstimateSource, ConfidenceBand, f64)>,
    modset: ModsetOutcome,
    fuzzy: bool,
    disagreement: Option<Disagreement>,
}

/// Estimate every holdout sample and compare against its realized price
pub fn evaluate(engine: &CalibrationEngine, holdout: &[Sample]) -> EvaluationReport {
    let outcomes: Vec<HoldoutOutcome> = holdout
        .par_iter()
        .map(|sample| {
            let estimate = engine.estimate(&sample.features);
            let answer = match (estimate.price, estimate.source) {
                (Some(price), Some(source)) => {
                    Some((source, estimate.band(), stats::price_ratio(price, sample.price)))
                }
                _ => None,
            };
            let probe = engine.probe_all(&sample.features);
            let modset = engine.modset().diagnose(&sample.features);
            HoldoutOutcome {
                answer,
                fuzzy: !matches!(modset, ModsetOutcome::Estimate(_)) && probe.fuzzy_modset.is_some(),
                modset,
                disagreement: Disagreement::from_probe(sample, &probe),
            }
        })
        .collect();

    let mut all = Vec::new();
    let mut by_source: BTreeMap<EstimateSource, Vec<f64>> = BTreeMap::new();
    let mut by_band: BTreeMap<ConfidenceBand, Vec<f64>> = BTreeMap::new();
    let mut unanswered = 0;
    let mut modset_filters = ModsetFilterCounts::default();
    let mut disagreements = Vec::new();
    for outcome in outcomes {
        match outcome.answer {
            Some((source, band, ratio)) => {
                all.push(ratio);
                by_source.entry(source).or_default().push(ratio);
                by_band.entry(band).or_default().push(ratio);
            }
            None => unanswered += 1,
        }
        modset_filters.record(outcome.modset, outcome.fuzzy);
        disagreements.extend(outcome.disagreement);
    }
    let disagreement_count = disagreements.len();
    disagreements.sort_by(|a, b| b.ratio.total_cmp(&a.ratio));
    disagreements.truncate(MAX_REPORTED_DISAGREEMENTS);

    let report = EvaluationReport {
        total: holdout.len(),
        unanswered,
        overall: Accuracy::from_ratios(&all),
        by_source: by_source
            .into_iter()
            .map(|(k, v)| (k, Accuracy::from_ratios(&v)))
            .collect(),
        by_band: by_band
            .into_iter()
            .map(|(k, v)| (k, Accuracy::from_ratios(&v)))
            .collect(),
        modset_coverage: engine.modset().coverage(),
        modset_filters,
        disagreement_count,
        disagreements,
    };
    info!(
        total = report.total,
        unanswered = report.unanswered,
        within_2x = report.overall.within_2x,
        median_ratio = report.overall.median_ratio,
        modset_answered = report.modset_filters.answered,
        disagreements = report.disagreement_count,
        "holdout evaluation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalibrationConfig;
    use crate::model::ItemFeatures;

    #[test]
    fn ratios_summarize() {
        let acc = Accuracy::from_ratios(&[1.0, 1.5, 2.5, 4.0]);
        assert_eq!(acc.count, 4);
        assert_eq!(acc.within_2x, 0.5);
        assert_eq!(acc.within_3x, 0.75);
        assert_eq!(acc.median_ratio, 2.0);
    }

    #[test]
    fn evaluates_modset_answers() {
        let mut builder = CalibrationEngine::builder(CalibrationConfig::default());
        for price in [10.0, 12.0, 14.0] {
            let f = ItemFeatures::new("Rings", 0.6).with_mod_groups(["Life", "FireResist"]);
            builder.insert(Sample::new(f, price)).unwrap();
        }
        let engine = builder.build();

        let holdout = vec![
            Sample::new(ItemFeatures::new("Rings", 0.6).with_mod_groups(["Life", "FireResist"]), 5.0),
            Sample::new(ItemFeatures::new("Belts", 0.2), 1.0),
        ];
        let report = evaluate(&engine, &holdout);
        assert_eq!(report.total, 2);
        assert_eq!(report.unanswered, 1);
        let modset = report.by_source[&EstimateSource::Modset];
        assert_eq!(modset.count, 1);
        assert_eq!(modset.within_2x, 0.0);
        assert_eq!(modset.within_3x, 1.0);
        assert_eq!(report.by_band[&ConfidenceBand::High].count, 1);
        assert_eq!(report.modset_coverage.total_keys, 1);
        assert_eq!(report.modset_coverage.keys_ge3, 1);
    }

    fn tiered(groups: [&str; 2], tiers: &[(&str, u32)], somv: f64) -> ItemFeatures {
        ItemFeatures::new("Rings", 0.5)
            .with_mod_groups(groups)
            .with_mod_tiers(tiers.iter().map(|(k, t)| (*k, *t)))
            .with_somv_factor(somv)
    }

    #[test]
    fn counts_modset_filter_rejections() {
        let mut builder = CalibrationEngine::builder(CalibrationConfig::default());
        let buckets: [([&str; 2], &[f64]); 5] = [
            (["Life", "Armour"], &[10.0, 12.0, 14.0]),
            (["Life", "Spirit"], &[1.0, 50.0, 100.0]),
            (["Life", "Mana"], &[3.0, 3.0]),
            (["Life", "FireResist"], &[5.0, 5.0, 5.0]),
            (["Life", "ColdResist"], &[7.0, 7.0, 7.0]),
        ];
        for (groups, prices) in buckets {
            for p in prices {
                builder.insert(Sample::new(tiered(groups, &[("life", 1)], 1.0), *p)).unwrap();
            }
        }
        let engine = builder.build();

        let one_tier: &[(&str, u32)] = &[("life", 1)];
        let holdout: Vec<Sample> = vec![
            tiered(["Life", "Armour"], one_tier, 1.0),
            tiered(["Life", "Spirit"], one_tier, 1.0),
            tiered(["Life", "Mana"], one_tier, 1.0),
            tiered(["Life", "FireResist"], &[("life", 1), ("fire", 1), ("cold", 1)], 1.0),
            tiered(["Life", "ColdResist"], one_tier, 2.0),
            tiered(["Life", "Chaos"], one_tier, 1.0),
            ItemFeatures::new("Rings", 0.5),
        ]
        .into_iter()
        .map(|f| Sample::new(f, 10.0))
        .collect();

        let filters = evaluate(&engine, &holdout).modset_filters;
        assert_eq!(
            filters,
            ModsetFilterCounts {
                with_mod_groups: 6,
                answered: 1,
                missing_key: 1,
                too_few_entries: 1,
                spread_too_wide: 1,
                tier_filtered: 1,
                somv_filtered: 1,
                fuzzy_answered: 0,
            }
        );
    }

    #[test]
    fn reports_estimators_that_disagree() {
        let mut builder = CalibrationEngine::builder(CalibrationConfig::default());
        for _ in 0..3 {
            let f = ItemFeatures::new("Rings", 0.1).with_mod_groups(["Life", "Armour"]);
            builder.insert(Sample::new(f, 1.0)).unwrap();
        }
        for _ in 0..10 {
            builder.insert(Sample::new(ItemFeatures::new("Rings", 0.9), 100.0)).unwrap();
        }
        let engine = builder.build();

        let query = ItemFeatures::new("Rings", 0.9).with_mod_groups(["Life", "Armour"]);
        let probe = engine.probe_all(&query);
        assert!(probe.modset.is_some());
        assert!(probe.neighbors.is_some());

        let report = evaluate(&engine, &[Sample::new(query, 5.0)]);
        assert_eq!(report.disagreement_count, 1);
        let worst = &report.disagreements[0];
        assert!(worst.ratio > DISAGREEMENT_RATIO);
        assert_eq!(worst.actual, 5.0);
        assert_eq!(worst.estimates[0].0, EstimateSource::Modset);
        assert_eq!(worst.estimates[1].0, EstimateSource::NeighborsClass);
    }

    #[test]
    fn agreeing_estimators_are_not_reported() {
        let mut builder = CalibrationEngine::builder(CalibrationConfig::default());
        for _ in 0..12 {
            let f = ItemFeatures::new("Rings", 0.5).with_mod_groups(["Life", "Armour"]);
            builder.insert(Sample::new(f, 8.0)).unwrap();
        }
        let engine = builder.build();
        let query = ItemFeatures::new("Rings", 0.5).with_mod_groups(["Life", "Armour"]);
        let report = evaluate(&engine, &[Sample::new(query, 8.0)]);
        assert_eq!(report.disagreement_count, 0);
        assert!(report.disagreements.is_empty());
    }
}
