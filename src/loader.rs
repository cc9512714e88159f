use crate::error::{CalibrationError, Result};
use crate::model::{Grade, ItemFeatures, Provenance, Sample, SALE_CONFIDENCE_UNKNOWN};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

/// One line of a calibration shard
#[derive(Debug, Deserialize)]
struct CorpusRecord {
    #[serde(default)]
    min_divine: f64,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    item_class: String,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default = "one")]
    dps_factor: f64,
    #[serde(default = "one")]
    defense_factor: f64,
    #[serde(default)]
    top_tier_count: u32,
    #[serde(default = "default_mod_count")]
    mod_count: u32,
    #[serde(default)]
    ts: i64,
    #[serde(default)]
    is_user: bool,
    #[serde(default)]
    mod_groups: Vec<String>,
    #[serde(default)]
    base_type: Option<String>,
    #[serde(default)]
    mod_tiers: BTreeMap<String, u32>,
    #[serde(default = "one")]
    somv_factor: f64,
    #[serde(default)]
    mod_rolls: BTreeMap<String, f64>,
    #[serde(default)]
    pdps: f64,
    #[serde(default)]
    edps: f64,
    #[serde(default)]
    sale_confidence: Option<f64>,
    #[serde(default)]
    mod_stats: BTreeMap<String, f64>,
    #[serde(default)]
    quality: u32,
    #[serde(default)]
    sockets: u32,
    #[serde(default)]
    corrupted: bool,
    #[serde(default)]
    open_prefixes: u32,
    #[serde(default)]
    open_suffixes: u32,
}

fn one() -> f64 {
    1.0
}

fn default_mod_count() -> u32 {
    4
}

impl CorpusRecord {
    fn into_sample(self) -> Sample {
        let grade = self
            .grade
            .as_deref()
            .and_then(|g| g.parse::<Grade>().ok())
            .unwrap_or_default();
        let features = ItemFeatures {
            item_class: self.item_class,
            score: self.score,
            grade,
            dps_factor: self.dps_factor,
            defense_factor: self.defense_factor,
            top_tier_count: self.top_tier_count,
            mod_count: self.mod_count,
            mod_groups: self
                .mod_groups
                .into_iter()
                .filter(|g| !g.is_empty())
                .collect::<BTreeSet<_>>(),
            base_type: self.base_type.filter(|b| !b.is_empty()),
            mod_tiers: self.mod_tiers,
            somv_factor: self.somv_factor,
            mod_rolls: self.mod_rolls,
            pdps: self.pdps,
            edps: self.edps,
            mod_stats: self.mod_stats,
            quality: self.quality,
            sockets: self.sockets,
            corrupted: self.corrupted,
            open_prefixes: self.open_prefixes,
            open_suffixes: self.open_suffixes,
        };
        let provenance = if self.is_user {
            Provenance::UserSubmitted
        } else {
            Provenance::Harvested
        };
        Sample::new(features, self.min_divine)
            .with_timestamp(self.ts)
            .with_provenance(provenance)
            .with_sale_confidence(self.sale_confidence.unwrap_or(SALE_CONFIDENCE_UNKNOWN))
    }
}

/// Parsed corpus plus the records left out
#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub samples: Vec<Sample>,
    pub skipped_no_price: usize,
    pub skipped_no_class: usize,
}

/// Read JSON-lines records. Blank lines are ignored; records without a
/// positive price or an item class are counted and skipped.
pub fn read_corpus<R: Read>(reader: R) -> Result<LoadedCorpus> {
    let mut corpus = LoadedCorpus::default();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: CorpusRecord = serde_json::from_str(trimmed)
            .map_err(|source| CalibrationError::Json { line: idx + 1, source })?;

        if !(record.min_divine.is_finite() && record.min_divine > 0.0) {
            corpus.skipped_no_price += 1;
            continue;
        }
        if record.item_class.is_empty() {
            corpus.skipped_no_class += 1;
            continue;
        }
        corpus.samples.push(record.into_sample());
    }
    Ok(corpus)
}

pub fn load_corpus(path: impl AsRef<Path>) -> Result<LoadedCorpus> {
    let path = path.as_ref();
    let corpus = read_corpus(File::open(path)?)?;
    info!(
        path = %path.display(),
        samples = corpus.samples.len(),
        skipped_no_price = corpus.skipped_no_price,
        "corpus loaded"
    );
    if corpus.skipped_no_class > 0 {
        warn!(skipped = corpus.skipped_no_class, "records without item class skipped");
    }
    Ok(corpus)
}
