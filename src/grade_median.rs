use crate::model::Grade;
use crate::stats;
use crate::store::SampleStore;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeMedian {
    pub price: f64,
    pub samples: usize,
}

/// Last-resort price: sale-confidence weighted median per (class, grade)
#[derive(Debug, Default)]
pub struct GradeMedianIndex {
    buckets: HashMap<(String, Grade), Vec<(f64, f64)>>,
}

impl GradeMedianIndex {
    pub fn build(store: &SampleStore) -> Self {
        let mut buckets: HashMap<(String, Grade), Vec<(f64, f64)>> = HashMap::new();
        for sample in store.samples() {
            buckets
                .entry((sample.features.item_class.clone(), sample.features.grade))
                .or_default()
                .push((sample.price, sample.weight()));
        }
        Self { buckets }
    }

    pub fn estimate(&self, item_class: &str, grade: Grade) -> Option<GradeMedian> {
        let pairs = self.buckets.get(&(item_class.to_string(), grade))?;
        stats::weighted_median(pairs).map(|price| GradeMedian {
            price,
            samples: pairs.len(),
        })
    }
}
