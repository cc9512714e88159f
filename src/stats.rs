use statrs::statistics::Statistics;
use std::cmp::Ordering;

/// Nearest-rank quantile of an already sorted slice
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q.clamp(0.0, 1.0)).round() as usize;
    sorted[idx]
}

/// Weighted median of (value, weight) pairs.
///
/// With equal weights this is the ordinary median, including the
/// average of the two middle values for even counts. Pairs with a
/// non-positive or non-finite weight are ignored.
pub fn weighted_median(pairs: &[(f64, f64)]) -> Option<f64> {
    let mut pairs: Vec<(f64, f64)> = pairs
        .iter()
        .copied()
        .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    let half = total / 2.0;
    let tolerance = total * 1e-12;

    let mut cumulative = 0.0;
    for (i, &(value, weight)) in pairs.iter().enumerate() {
        cumulative += weight;
        if (cumulative - half).abs() <= tolerance {
            // Exactly half the mass sits at or below this value
            return Some(match pairs.get(i + 1) {
                Some(&(next, _)) => (value + next) / 2.0,
                None => value,
            });
        }
        if cumulative > half {
            return Some(value);
        }
    }
    pairs.last().map(|(v, _)| *v)
}

/// Unweighted median
pub fn median(values: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = values.iter().map(|v| (*v, 1.0)).collect();
    weighted_median(&pairs)
}

pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    let (sum, total) = pairs
        .iter()
        .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
        .fold((0.0, 0.0), |(s, t), (v, w)| (s + v * w, t + w));
    if total > 0.0 {
        Some(sum / total)
    } else {
        None
    }
}

/// max - min of the values, 0.0 when empty
pub fn spread(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::max(values.iter()) - Statistics::min(values.iter())
}

/// Symmetric ratio between an estimate and the realized price (≥ 1)
pub fn price_ratio(estimate: f64, actual: f64) -> f64 {
    if estimate <= 0.0 || actual <= 0.0 {
        return f64::INFINITY;
    }
    (estimate / actual).max(actual / estimate)
}

/// Five-number summary used by the coverage diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct Distribution {
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
}

pub fn distribution(values: &[f64]) -> Distribution {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Distribution {
        min: quantile(&sorted, 0.0),
        p25: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.50),
        p75: quantile(&sorted, 0.75),
        max: quantile(&sorted, 1.0),
    }
}
