use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Popularity of a mod group on an item class, used to weight the
/// Jaccard term of the neighbor distance
pub trait DemandIndex: Send + Sync {
    fn mod_demand(&self, item_class: &str, mod_group: &str) -> f64;
}

/// Demand data deserialized from a `{class: {mod_group: score}}` map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticDemandIndex {
    index: HashMap<String, HashMap<String, f64>>,
}

impl StaticDemandIndex {
    pub fn new(index: HashMap<String, HashMap<String, f64>>) -> Self {
        Self { index }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| crate::error::CalibrationError::Json { line: 0, source })
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Mean demand across an item's mod groups, 0.0 without data
    pub fn demand_score<'a, I>(&self, item_class: &str, mod_groups: I) -> f64
    where
        I: IntoIterator<Item = &'a String>,
    {
        let scores: Vec<f64> = mod_groups
            .into_iter()
            .map(|g| self.mod_demand(item_class, g))
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

impl DemandIndex for StaticDemandIndex {
    fn mod_demand(&self, item_class: &str, mod_group: &str) -> f64 {
        self.index
            .get(item_class)
            .and_then(|class| class.get(mod_group))
            .copied()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or(0.0)
    }
}
