//! Weighted ridge regression on log-price.
//!
//! Reference [`RegressionTrainer`]: one linear model per item class over
//! standardized numeric features plus mod-group indicators, with
//! sale confidence as the observation weight and a k-fold
//! cross-validated r² for diagnostics.

use crate::config::RegressionConfig;
use crate::error::{CalibrationError, PredictError, Result};
use crate::regression::{PriceModel, RegressionFeatures, RegressionTrainer, TrainedModel, TrainingRow};
use rayon::prelude::*;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

const NUMERIC_FEATURES: usize = 18;

#[derive(Debug, Clone)]
struct FeatureEncoder {
    archetypes: Vec<String>,
    mod_vocab: Vec<String>,
}

impl FeatureEncoder {
    fn fit(rows: &[TrainingRow]) -> Self {
        let mut archetypes = BTreeSet::new();
        let mut mod_vocab = BTreeSet::new();
        for row in rows {
            archetypes.extend(row.features.archetype_scores.keys().cloned());
            mod_vocab.extend(row.features.mod_groups.iter().cloned());
        }
        Self {
            archetypes: archetypes.into_iter().collect(),
            mod_vocab: mod_vocab.into_iter().collect(),
        }
    }

    fn width(&self) -> usize {
        NUMERIC_FEATURES + self.archetypes.len() + self.mod_vocab.len()
    }

    /// Column 0 is the intercept
    fn encode(&self, f: &RegressionFeatures) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.width());
        x.extend_from_slice(&[
            1.0,
            f.grade.ordinal() as f64,
            f.score,
            f.top_tier_count as f64,
            f.mod_count as f64,
            f.dps_factor,
            f.defense_factor,
            f.somv_factor,
            f.tier_score,
            f.best_tier as f64,
            f.avg_tier,
            f.pdps.max(0.0).ln_1p(),
            f.edps.max(0.0).ln_1p(),
            f.quality as f64,
            f.sockets as f64,
            if f.corrupted { 1.0 } else { 0.0 },
            f.open_prefixes as f64,
            f.open_suffixes as f64,
        ]);
        x.extend(
            self.archetypes
                .iter()
                .map(|name| f.archetype_scores.get(name).copied().unwrap_or(0.0)),
        );
        x.extend(
            self.mod_vocab
                .iter()
                .map(|g| if f.mod_groups.contains(g) { 1.0 } else { 0.0 }),
        );
        x
    }
}

/// Fitted linear model over standardized features
#[derive(Debug, Clone)]
pub struct RidgeModel {
    encoder: FeatureEncoder,
    means: Vec<f64>,
    scales: Vec<f64>,
    coefficients: Vec<f64>,
}

impl RidgeModel {
    fn standardize(&self, mut x: Vec<f64>) -> Vec<f64> {
        for (j, v) in x.iter_mut().enumerate().skip(1) {
            *v = if self.scales[j] > 0.0 {
                (*v - self.means[j]) / self.scales[j]
            } else {
                0.0
            };
        }
        x
    }
}

impl PriceModel for RidgeModel {
    fn predict_log_price(&self, features: &RegressionFeatures) -> std::result::Result<f64, PredictError> {
        let x = self.standardize(self.encoder.encode(features));
        if x.len() != self.coefficients.len() {
            return Err(PredictError::FeatureShape {
                expected: self.coefficients.len(),
                actual: x.len(),
            });
        }
        let y: f64 = x.iter().zip(&self.coefficients).map(|(a, b)| a * b).sum();
        if y.is_finite() {
            Ok(y)
        } else {
            Err(PredictError::NonFinite)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RidgeTrainer {
    config: RegressionConfig,
}

impl RidgeTrainer {
    pub fn new(config: RegressionConfig) -> Self {
        Self { config }
    }

    pub fn fit(&self, rows: &[TrainingRow]) -> Result<RidgeModel> {
        let encoder = FeatureEncoder::fit(rows);
        let raw: Vec<Vec<f64>> = rows.iter().map(|r| encoder.encode(&r.features)).collect();
        let width = encoder.width();

        let mut means = vec![0.0; width];
        let mut scales = vec![0.0; width];
        for j in 1..width {
            let column: Vec<f64> = raw.iter().map(|x| x[j]).collect();
            means[j] = Statistics::mean(column.iter());
            scales[j] = Statistics::population_std_dev(column.iter());
            if !scales[j].is_finite() {
                scales[j] = 0.0;
            }
        }

        let mut model = RidgeModel {
            encoder,
            means,
            scales,
            coefficients: Vec::new(),
        };
        let design: Vec<Vec<f64>> = raw.into_iter().map(|x| model.standardize(x)).collect();
        let targets: Vec<f64> = rows.iter().map(|r| r.price.ln()).collect();
        let weights: Vec<f64> = rows.iter().map(|r| r.sale_confidence).collect();

        model.coefficients = solve_ridge(&design, &targets, &weights, self.config.ridge_lambda)?;
        Ok(model)
    }

    /// Weighted out-of-fold r² on log-price
    pub fn cross_validate(&self, rows: &[TrainingRow]) -> Result<f64> {
        let folds = self.config.cv_folds.max(2);
        if rows.len() < folds {
            return Ok(0.0);
        }
        let mut predictions = vec![0.0; rows.len()];
        for fold in 0..folds {
            let train: Vec<TrainingRow> = rows
                .iter()
                .enumerate()
                .filter(|(i, _)| i % folds != fold)
                .map(|(_, r)| r.clone())
                .collect();
            let model = self.fit(&train)?;
            for (i, row) in rows.iter().enumerate().filter(|(i, _)| i % folds == fold) {
                predictions[i] = model
                    .predict_log_price(&row.features)
                    .map_err(|e| CalibrationError::Training(e.to_string()))?;
            }
        }

        let total_weight: f64 = rows.iter().map(|r| r.sale_confidence).sum();
        let mean = rows.iter().map(|r| r.sale_confidence * r.price.ln()).sum::<f64>() / total_weight;
        let (ss_res, ss_tot) = rows.iter().zip(&predictions).fold((0.0, 0.0), |(res, tot), (r, p)| {
            let y = r.price.ln();
            (
                res + r.sale_confidence * (y - p).powi(2),
                tot + r.sale_confidence * (y - mean).powi(2),
            )
        });
        Ok(if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 })
    }
}

impl RegressionTrainer for RidgeTrainer {
    fn train(&self, batches: &BTreeMap<String, Vec<TrainingRow>>) -> Result<HashMap<String, TrainedModel>> {
        let eligible: Vec<(&String, Vec<TrainingRow>)> = batches
            .iter()
            .map(|(class, rows)| {
                let rows: Vec<TrainingRow> = rows
                    .iter()
                    .filter(|r| r.price.is_finite() && r.price > 0.0)
                    .cloned()
                    .collect();
                (class, rows)
            })
            .filter(|(class, rows)| {
                let keep = rows.len() >= self.config.min_class_samples;
                if !keep {
                    debug!(item_class = %class, samples = rows.len(), "too few samples for a model");
                }
                keep
            })
            .collect();

        let trained: Vec<(String, TrainedModel)> = eligible
            .par_iter()
            .map(|(class, rows)| {
                let r2_cv = self.cross_validate(rows)?;
                let model = self.fit(rows)?;
                Ok((
                    (*class).clone(),
                    TrainedModel {
                        model: Arc::new(model),
                        n_train: rows.len(),
                        r2_cv,
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(models = trained.len(), classes = batches.len(), "ridge training finished");
        Ok(trained.into_iter().collect())
    }
}

/// Solve (XᵀWX + λI')β = XᵀWy; the intercept column is not penalized
fn solve_ridge(design: &[Vec<f64>], targets: &[f64], weights: &[f64], lambda: f64) -> Result<Vec<f64>> {
    let width = design.first().map(Vec::len).unwrap_or(0);
    if width == 0 {
        return Err(CalibrationError::Training("empty design matrix".to_string()));
    }
    let mut a = vec![vec![0.0; width]; width];
    let mut b = vec![0.0; width];
    for ((x, y), w) in design.iter().zip(targets).zip(weights) {
        for i in 0..width {
            b[i] += w * x[i] * y;
            for j in 0..width {
                a[i][j] += w * x[i] * x[j];
            }
        }
    }
    for (i, row) in a.iter_mut().enumerate().skip(1) {
        row[i] += lambda;
    }
    gaussian_solve(a, b)
}

fn gaussian_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(CalibrationError::Training("singular normal equations".to_string()));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}
