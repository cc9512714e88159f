use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Maps a mod-group set to named build-pattern affinities in [0, 1]
pub trait ArchetypeScorer: Send + Sync {
    fn scores(&self, mod_groups: &BTreeSet<String>) -> BTreeMap<String, f64>;
}

/// Affinity = share of a pattern's mod groups present on the item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternArchetypeScorer {
    patterns: BTreeMap<String, BTreeSet<String>>,
}

impl PatternArchetypeScorer {
    pub fn new(patterns: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { patterns }
    }
}

impl Default for PatternArchetypeScorer {
    fn default() -> Self {
        let pattern = |groups: &[&str]| groups.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>();
        let mut patterns = BTreeMap::new();
        patterns.insert(
            "coc_spell".to_string(),
            pattern(&["CriticalStrikeChance", "CriticalStrikeMultiplier", "SpellDamage", "CastSpeed"]),
        );
        patterns.insert(
            "ci_es".to_string(),
            pattern(&["EnergyShield", "Intelligence", "AllResist", "Spirit"]),
        );
        patterns.insert(
            "mom_mana".to_string(),
            pattern(&["MaximumMana", "ManaRegeneration", "IncreasedLife", "Intelligence"]),
        );
        Self { patterns }
    }
}

impl ArchetypeScorer for PatternArchetypeScorer {
    fn scores(&self, mod_groups: &BTreeSet<String>) -> BTreeMap<String, f64> {
        self.patterns
            .iter()
            .map(|(name, pattern)| {
                let score = if pattern.is_empty() {
                    0.0
                } else {
                    pattern.intersection(mod_groups).count() as f64 / pattern.len() as f64
                };
                (name.clone(), score)
            })
            .collect()
    }
}
