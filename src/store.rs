use crate::error::{CalibrationError, Result};
use crate::model::Sample;
use std::collections::HashMap;
use tracing::debug;

/// Historical observations, indexed globally and per item class.
///
/// Append-only while building; a refresh constructs a new store.
#[derive(Debug, Default)]
pub struct SampleStore {
    samples: Vec<Sample>,
    by_class: HashMap<String, Vec<usize>>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Prices must be positive and finite.
    pub fn insert(&mut self, mut sample: Sample) -> Result<()> {
        if !(sample.price.is_finite() && sample.price > 0.0) {
            debug!(item_class = %sample.item_class(), price = sample.price, "rejecting sample");
            return Err(CalibrationError::NonPositivePrice {
                item_class: sample.item_class().to_string(),
                price: sample.price,
            });
        }
        if sample.item_class().is_empty() {
            return Err(CalibrationError::EmptyItemClass);
        }
        sample.tier_score = sample.features.tier_score();

        let idx = self.samples.len();
        self.by_class
            .entry(sample.features.item_class.clone())
            .or_default()
            .push(idx);
        self.samples.push(sample);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Indices into [`samples`](Self::samples) for one class, in insertion order
    pub fn class_indices(&self, item_class: &str) -> &[usize] {
        self.by_class.get(item_class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn class_len(&self, item_class: &str) -> usize {
        self.class_indices(item_class).len()
    }

    pub fn class_count(&self) -> usize {
        self.by_class.len()
    }

    /// (class, sample count), largest classes first
    pub fn class_sizes(&self) -> Vec<(&str, usize)> {
        let mut sizes: Vec<(&str, usize)> = self
            .by_class
            .iter()
            .map(|(class, idx)| (class.as_str(), idx.len()))
            .collect();
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemFeatures;

    fn sample(class: &str, price: f64) -> Sample {
        Sample::new(ItemFeatures::new(class, 0.5), price)
    }

    #[test]
    fn insert_indexes_globally_and_per_class() {
        let mut store = SampleStore::new();
        store.insert(sample("Rings", 1.0)).unwrap();
        store.insert(sample("Belts", 2.0)).unwrap();
        store.insert(sample("Rings", 3.0)).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.class_count(), 2);
        assert_eq!(store.class_indices("Rings"), &[0, 2]);
        assert_eq!(store.class_len("Belts"), 1);
        assert_eq!(store.class_len("Amulets"), 0);
        assert_eq!(store.class_sizes()[0], ("Rings", 2));
    }

    #[test]
    fn rejects_non_positive_price() {
        let mut store = SampleStore::new();
        for price in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = store.insert(sample("Rings", price)).unwrap_err();
            assert!(matches!(err, CalibrationError::NonPositivePrice { .. }));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn rejects_empty_class() {
        let mut store = SampleStore::new();
        let err = store.insert(sample("", 1.0)).unwrap_err();
        assert!(matches!(err, CalibrationError::EmptyItemClass));
    }

    #[test]
    fn insert_refreshes_cached_tier_score() {
        let mut store = SampleStore::new();
        let mut s = sample("Rings", 1.0);
        s.features.mod_tiers.insert("life".into(), 2);
        store.insert(s).unwrap();
        assert_eq!(store.samples()[0].tier_score(), 0.5);
    }
}
