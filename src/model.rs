use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Listing disappeared after harvest, most likely sold
pub const SALE_CONFIDENCE_SOLD: f64 = 3.0;
/// Listing not rechecked yet
pub const SALE_CONFIDENCE_UNKNOWN: f64 = 1.0;
/// Still listed long after harvest, probably overpriced
pub const SALE_CONFIDENCE_STALE: f64 = 0.3;
/// Weights below this are raised to it so every sample still counts
pub const MIN_SALE_CONFIDENCE: f64 = 1e-3;

/// Ordinal quality bucket derived from the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "JUNK", alias = "Junk", alias = "junk")]
    Junk,
    #[default]
    C,
    B,
    A,
    S,
}

impl Grade {
    pub fn ordinal(self) -> u8 {
        match self {
            Grade::Junk => 0,
            Grade::C => 1,
            Grade::B => 2,
            Grade::A => 3,
            Grade::S => 4,
        }
    }

    pub fn from_ordinal(n: u8) -> Option<Self> {
        match n {
            0 => Some(Grade::Junk),
            1 => Some(Grade::C),
            2 => Some(Grade::B),
            3 => Some(Grade::A),
            4 => Some(Grade::S),
            _ => None,
        }
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JUNK" => Ok(Grade::Junk),
            "C" => Ok(Grade::C),
            "B" => Ok(Grade::B),
            "A" => Ok(Grade::A),
            "S" => Ok(Grade::S),
            other => Err(format!("unknown grade '{other}'")),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::Junk => "JUNK",
            Grade::C => "C",
            Grade::B => "B",
            Grade::A => "A",
            Grade::S => "S",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    UserSubmitted,
    #[default]
    Harvested,
}

fn one() -> f64 {
    1.0
}

fn default_mod_count() -> u32 {
    4
}

/// Empty tags never form part of a modset key
fn non_empty_groups<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let groups = Vec::<String>::deserialize(deserializer)?;
    Ok(groups.into_iter().filter(|g| !g.is_empty()).collect())
}

/// Everything known about an item apart from its price.
///
/// Shared by stored samples and estimate queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFeatures {
    pub item_class: String,
    pub score: f64,
    #[serde(default)]
    pub grade: Grade,
    #[serde(default = "one")]
    pub dps_factor: f64,
    #[serde(default = "one")]
    pub defense_factor: f64,
    #[serde(default)]
    pub top_tier_count: u32,
    #[serde(default = "default_mod_count")]
    pub mod_count: u32,
    #[serde(default, deserialize_with = "non_empty_groups")]
    pub mod_groups: BTreeSet<String>,
    #[serde(default)]
    pub base_type: Option<String>,
    /// Affix id -> tier rank, 1 is best; 0 means unknown
    #[serde(default)]
    pub mod_tiers: BTreeMap<String, u32>,
    #[serde(default = "one")]
    pub somv_factor: f64,
    #[serde(default)]
    pub mod_rolls: BTreeMap<String, f64>,
    #[serde(default)]
    pub pdps: f64,
    #[serde(default)]
    pub edps: f64,
    #[serde(default)]
    pub mod_stats: BTreeMap<String, f64>,
    #[serde(default)]
    pub quality: u32,
    #[serde(default)]
    pub sockets: u32,
    #[serde(default)]
    pub corrupted: bool,
    #[serde(default)]
    pub open_prefixes: u32,
    #[serde(default)]
    pub open_suffixes: u32,
}

/// Estimate queries carry the same fields as samples, minus the price
pub type ItemQuery = ItemFeatures;

impl ItemFeatures {
    pub fn new(item_class: impl Into<String>, score: f64) -> Self {
        Self {
            item_class: item_class.into(),
            score,
            grade: Grade::default(),
            dps_factor: 1.0,
            defense_factor: 1.0,
            top_tier_count: 0,
            mod_count: default_mod_count(),
            mod_groups: BTreeSet::new(),
            base_type: None,
            mod_tiers: BTreeMap::new(),
            somv_factor: 1.0,
            mod_rolls: BTreeMap::new(),
            pdps: 0.0,
            edps: 0.0,
            mod_stats: BTreeMap::new(),
            quality: 0,
            sockets: 0,
            corrupted: false,
            open_prefixes: 0,
            open_suffixes: 0,
        }
    }

    pub fn with_grade(mut self, grade: Grade) -> Self {
        self.grade = grade;
        self
    }

    pub fn with_mod_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mod_groups = groups
            .into_iter()
            .map(Into::into)
            .filter(|g: &String| !g.is_empty())
            .collect();
        self
    }

    pub fn with_mod_tiers<I, S>(mut self, tiers: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        self.mod_tiers = tiers.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    pub fn with_base_type(mut self, base_type: impl Into<String>) -> Self {
        let base_type = base_type.into();
        self.base_type = if base_type.is_empty() { None } else { Some(base_type) };
        self
    }

    pub fn with_somv_factor(mut self, somv_factor: f64) -> Self {
        self.somv_factor = somv_factor;
        self
    }

    fn positive_tiers(&self) -> impl Iterator<Item = u32> + '_ {
        self.mod_tiers.values().copied().filter(|t| *t > 0)
    }

    pub fn has_tiers(&self) -> bool {
        self.positive_tiers().next().is_some()
    }

    /// Σ 1/tier over positive-tier affixes, rounded to 3 decimals
    pub fn tier_score(&self) -> f64 {
        let sum: f64 = self.positive_tiers().map(|t| 1.0 / t as f64).sum();
        (sum * 1000.0).round() / 1000.0
    }

    pub fn best_tier(&self) -> u32 {
        self.positive_tiers().min().unwrap_or(0)
    }

    pub fn avg_tier(&self) -> f64 {
        let tiers: Vec<u32> = self.positive_tiers().collect();
        if tiers.is_empty() {
            return 0.0;
        }
        let avg = tiers.iter().sum::<u32>() as f64 / tiers.len() as f64;
        (avg * 100.0).round() / 100.0
    }

    /// Base type, treating an empty string as unset
    pub fn base_type(&self) -> Option<&str> {
        self.base_type.as_deref().filter(|b| !b.is_empty())
    }
}

/// One labeled historical observation
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: ItemFeatures,
    /// Realized price in divines
    pub price: f64,
    pub timestamp: i64,
    pub provenance: Provenance,
    pub sale_confidence: f64,
    pub(crate) tier_score: f64,
}

impl Sample {
    pub fn new(features: ItemFeatures, price: f64) -> Self {
        let tier_score = features.tier_score();
        Self {
            features,
            price,
            timestamp: 0,
            provenance: Provenance::default(),
            sale_confidence: SALE_CONFIDENCE_UNKNOWN,
            tier_score,
        }
    }

    pub fn with_sale_confidence(mut self, sale_confidence: f64) -> Self {
        self.sale_confidence = sale_confidence;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn item_class(&self) -> &str {
        &self.features.item_class
    }

    pub fn tier_score(&self) -> f64 {
        self.tier_score
    }

    /// sale_confidence as an aggregation weight
    pub fn weight(&self) -> f64 {
        if self.sale_confidence.is_finite() {
            self.sale_confidence.max(MIN_SALE_CONFIDENCE)
        } else {
            MIN_SALE_CONFIDENCE
        }
    }
}

/// Estimator that produced a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    Modset,
    FuzzyModset,
    Regression,
    NeighborsClass,
    NeighborsGlobal,
    GradeMedian,
}

/// Trust band a confidence value falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Lowest,
    Fallback,
    Neighbors,
    Mid,
    High,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            ConfidenceBand::High
        } else if confidence >= 0.5 {
            ConfidenceBand::Mid
        } else if confidence >= 0.3 {
            ConfidenceBand::Neighbors
        } else if confidence >= 0.1 {
            ConfidenceBand::Fallback
        } else {
            ConfidenceBand::Lowest
        }
    }
}

/// Price estimate together with its trust signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceEstimate {
    pub price: Option<f64>,
    pub confidence: f64,
    pub source: Option<EstimateSource>,
}

impl PriceEstimate {
    pub fn none() -> Self {
        PriceEstimate {
            price: None,
            confidence: 0.0,
            source: None,
        }
    }

    pub fn new(price: f64, confidence: f64, source: EstimateSource) -> Self {
        PriceEstimate {
            price: Some(price),
            confidence: confidence.clamp(0.0, 1.0),
            source: Some(source),
        }
    }

    pub fn is_some(&self) -> bool {
        self.price.is_some()
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_confidence(self.confidence)
    }
}
