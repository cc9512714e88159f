use crate::error::{CalibrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration. Built once, validated, then handed to the
/// engine by value; a settings change means building a new engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub distance: DistanceWeights,
    pub neighbors: NeighborConfig,
    pub modset: ModsetConfig,
    pub regression: RegressionConfig,
    pub grade_median: GradeMedianConfig,
}

/// Weights of the k-NN distance terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceWeights {
    pub score: f64,
    pub grade: f64,
    pub dps: f64,
    pub defense: f64,
    pub top_tier: f64,
    pub mod_count: f64,
    /// Multiplier on the mod-similarity term (Jaccard or per-stat)
    pub mods: f64,
    /// Flat penalty for differing base types
    pub base_type: f64,
    pub tier_score: f64,
}

impl Default for DistanceWeights {
    fn default() -> Self {
        Self {
            score: 1.0,
            grade: 0.5,
            dps: 0.5,
            defense: 0.5,
            top_tier: 0.15,
            mod_count: 0.1,
            mods: 1.0,
            base_type: 0.3,
            tier_score: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborConfig {
    /// Neighbors used for the weighted average
    pub k: usize,
    pub min_class_samples: usize,
    pub min_global_samples: usize,
    /// Distance at which proximity confidence halves
    pub distance_scale: f64,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            k: 8,
            min_class_samples: 10,
            min_global_samples: 20,
            distance_scale: 0.5,
        }
    }
}

/// Central tendency applied to the filtered log-prices of a modset bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModsetAggregate {
    Median,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModsetConfig {
    pub min_entries: usize,
    /// Largest accepted ln(max price) - ln(min price); inclusive
    pub max_log_spread: f64,
    pub tier_tolerance: f64,
    pub somv_tolerance: f64,
    pub aggregate: ModsetAggregate,
    /// Try drop-one-affix subsets when the exact key fails
    pub fuzzy: bool,
    /// Fewest mod groups a query needs before fuzzy matching applies
    pub fuzzy_min_groups: usize,
}

impl Default for ModsetConfig {
    fn default() -> Self {
        Self {
            min_entries: 3,
            max_log_spread: 2.2,
            tier_tolerance: 1.0,
            somv_tolerance: 0.3,
            aggregate: ModsetAggregate::Median,
            fuzzy: false,
            fuzzy_min_groups: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Classes with fewer samples get no model
    pub min_class_samples: usize,
    pub ridge_lambda: f64,
    pub cv_folds: usize,
    /// Models at or above this r2_cv land in the high band
    pub high_r2: f64,
    /// Models below this r2_cv are not used
    pub min_r2: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            min_class_samples: 30,
            ridge_lambda: 1.0,
            cv_folds: 5,
            high_r2: 0.6,
            min_r2: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeMedianConfig {
    /// Matches needed for the 0.1 band; fewer drops to the lowest band
    pub min_samples: usize,
}

impl Default for GradeMedianConfig {
    fn default() -> Self {
        Self { min_samples: 3 }
    }
}

impl CalibrationConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.distance;
        let weights = [
            w.score, w.grade, w.dps, w.defense, w.top_tier, w.mod_count, w.mods, w.base_type,
            w.tier_score,
        ];
        if weights.iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(CalibrationError::Config(
                "distance weights must be finite and non-negative".to_string(),
            ));
        }
        if self.neighbors.k == 0 {
            return Err(CalibrationError::Config("neighbors.k must be at least 1".to_string()));
        }
        if !self.neighbors.distance_scale.is_finite() || self.neighbors.distance_scale <= 0.0 {
            return Err(CalibrationError::Config(
                "neighbors.distance_scale must be positive".to_string(),
            ));
        }
        if self.modset.min_entries == 0 {
            return Err(CalibrationError::Config("modset.min_entries must be at least 1".to_string()));
        }
        if self.modset.max_log_spread < 0.0
            || self.modset.tier_tolerance < 0.0
            || self.modset.somv_tolerance < 0.0
        {
            return Err(CalibrationError::Config("modset tolerances must be non-negative".to_string()));
        }
        if self.regression.cv_folds < 2 {
            return Err(CalibrationError::Config("regression.cv_folds must be at least 2".to_string()));
        }
        if self.regression.min_r2 > self.regression.high_r2 {
            return Err(CalibrationError::Config(
                "regression.min_r2 must not exceed regression.high_r2".to_string(),
            ));
        }
        Ok(())
    }
}
