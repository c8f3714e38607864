//! Histogram gradient-boosted regression trees on squared error.
//!
//! Each round fits a depth-wise tree to the residual gradients of a row subsample using a
//! per-tree column subsample. With a validation set and a patience window, training stops once
//! validation RMSE has not strictly improved for `early_stopping_rounds` rounds and the model
//! records the best round count.

/// Quantile binning of feature columns.
pub mod binning;
/// Regression tree growth and evaluation.
pub mod tree;

use indexmap::IndexMap;
use ndarray::{Array1, ArrayView1};
use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ForecastError, ForecastResult},
    metrics,
    preprocess::FeatureMatrix,
};
use binning::{FeatureBins, MAX_BINS_LIMIT};
use tree::{RegressionTree, TreeBuilder};

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    /// Upper bound on boosting rounds.
    #[serde(default = "default_n_rounds")]
    pub n_rounds: usize,
    /// Shrinkage applied to every leaf.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Maximum tree depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Minimum hessian sum per child.
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,
    /// Fraction of rows sampled per round.
    #[serde(default = "default_subsample")]
    pub subsample: f64,
    /// Fraction of features sampled per tree.
    #[serde(default = "default_colsample")]
    pub colsample_bytree: f64,
    /// L2 regularisation on leaf weights.
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Minimum loss reduction for a split.
    #[serde(default)]
    pub gamma: f64,
    /// Patience window; `None` or `0` trains the full budget.
    #[serde(default = "default_early_stopping")]
    pub early_stopping_rounds: Option<usize>,
    /// Sampling seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Maximum histogram bins per feature.
    #[serde(default = "default_max_bins")]
    pub max_bins: usize,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_rounds: default_n_rounds(),
            learning_rate: default_learning_rate(),
            max_depth: default_max_depth(),
            min_child_weight: default_min_child_weight(),
            subsample: default_subsample(),
            colsample_bytree: default_colsample(),
            lambda: default_lambda(),
            gamma: 0.0,
            early_stopping_rounds: default_early_stopping(),
            seed: default_seed(),
            max_bins: default_max_bins(),
        }
    }
}

const fn default_n_rounds() -> usize {
    2000
}

const fn default_learning_rate() -> f64 {
    0.03
}

const fn default_max_depth() -> usize {
    7
}

const fn default_min_child_weight() -> f64 {
    3.0
}

const fn default_subsample() -> f64 {
    0.85
}

const fn default_colsample() -> f64 {
    0.9
}

const fn default_lambda() -> f64 {
    1.2
}

#[allow(clippy::unnecessary_wraps)]
const fn default_early_stopping() -> Option<usize> {
    Some(50)
}

const fn default_seed() -> u64 {
    42
}

const fn default_max_bins() -> usize {
    256
}

impl BoosterParams {
    /// Rejects values the booster cannot train with.
    pub fn validate(&self) -> ForecastResult<()> {
        let fraction_ok = |value: f64| value > 0.0 && value <= 1.0;
        let problem = if self.n_rounds == 0 {
            Some("n_rounds must be at least 1".to_string())
        } else if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            Some(format!("learning_rate {} must be positive", self.learning_rate))
        } else if !fraction_ok(self.subsample) {
            Some(format!("subsample {} must be in (0, 1]", self.subsample))
        } else if !fraction_ok(self.colsample_bytree) {
            Some(format!(
                "colsample_bytree {} must be in (0, 1]",
                self.colsample_bytree
            ))
        } else if self.lambda < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 {
            Some("lambda, gamma and min_child_weight must be non-negative".to_string())
        } else if !(2..=MAX_BINS_LIMIT).contains(&self.max_bins) {
            Some(format!(
                "max_bins {} must be between 2 and {MAX_BINS_LIMIT}",
                self.max_bins
            ))
        } else {
            None
        };
        problem.map_or(Ok(()), |message| Err(ForecastError::Config(message)))
    }

    /// Patience window when early stopping is enabled.
    #[must_use]
    pub fn patience(&self) -> Option<usize> {
        self.early_stopping_rounds.filter(|rounds| *rounds > 0)
    }
}

/// Held-out rows scored after every round for early stopping.
#[derive(Debug, Clone, Copy)]
pub struct Validation<'a> {
    /// Validation features, same columns as the training matrix.
    pub x: &'a FeatureMatrix,
    /// Validation targets.
    pub y: ArrayView1<'a, f64>,
}

/// Fitted ensemble for one target. Immutable once trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    feature_names: Vec<String>,
    base_score: f64,
    trees: Vec<RegressionTree>,
    best_rounds: Option<usize>,
    feature_gain: Vec<f64>,
}

impl TrainedModel {
    /// Predicts every row of `x`, whose columns must match the training columns.
    pub fn predict(&self, x: &FeatureMatrix) -> ForecastResult<Array1<f64>> {
        if x.names() != self.feature_names.as_slice() {
            return Err(ForecastError::Schema(format!(
                "model trained on {:?} cannot score {:?}",
                self.feature_names,
                x.names()
            )));
        }
        let trees = self.active_trees();
        Ok(x
            .values()
            .rows()
            .into_iter()
            .map(|row| {
                self.base_score + trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>()
            })
            .collect())
    }

    /// Trees used at prediction time: the first `best_rounds`, or all of them.
    #[must_use]
    pub fn active_trees(&self) -> &[RegressionTree] {
        let count = self
            .best_rounds
            .map_or(self.trees.len(), |best| best.min(self.trees.len()));
        &self.trees[..count]
    }

    /// Best round count found by early stopping.
    #[must_use]
    pub const fn best_rounds(&self) -> Option<usize> {
        self.best_rounds
    }

    /// Rounds actually trained, including those after the best checkpoint.
    #[must_use]
    pub fn rounds_trained(&self) -> usize {
        self.trees.len()
    }

    /// Initial prediction (mean of the training target).
    #[must_use]
    pub const fn base_score(&self) -> f64 {
        self.base_score
    }

    /// Feature names in training column order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Total split gain per feature, sorted from most to least important.
    #[must_use]
    pub fn feature_importance(&self) -> IndexMap<String, f64> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.feature_gain.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().collect()
    }
}

/// Gradient boosting trainer.
#[derive(Debug, Clone, Default)]
pub struct GradientBooster {
    params: BoosterParams,
}

impl GradientBooster {
    /// Creates a trainer with the given hyperparameters.
    #[must_use]
    pub const fn new(params: BoosterParams) -> Self {
        Self { params }
    }

    /// Hyperparameters in use.
    #[must_use]
    pub const fn params(&self) -> &BoosterParams {
        &self.params
    }

    /// Fits an ensemble. Early stopping is active only with a non-empty `validation` set and a
    /// positive patience; otherwise the full round budget is trained.
    pub fn fit(
        &self,
        x: &FeatureMatrix,
        y: ArrayView1<'_, f64>,
        validation: Option<Validation<'_>>,
    ) -> ForecastResult<TrainedModel> {
        self.params.validate()?;
        let n = x.nrows();
        if n == 0 {
            return Err(ForecastError::EmptyDataset("no training rows".into()));
        }
        if y.len() != n {
            return Err(ForecastError::Schema(format!(
                "{} target values for {n} feature rows",
                y.len()
            )));
        }
        if y.iter().any(|value| !value.is_finite()) {
            return Err(ForecastError::Schema("training target has missing values".into()));
        }
        let validation = match validation {
            Some(set) if set.x.names() != x.names() => {
                return Err(ForecastError::Schema(
                    "validation columns differ from training columns".into(),
                ))
            }
            Some(set) if set.x.nrows() > 0 && set.y.len() == set.x.nrows() => Some(set),
            _ => None,
        };
        let patience = self.params.patience().filter(|_| validation.is_some());

        #[allow(clippy::cast_precision_loss)]
        let base_score = y.sum() / n as f64;
        let cuts = FeatureBins::fit(x.values().view(), self.params.max_bins);
        let bins = cuts.bin_matrix(x.values().view());
        let n_features = x.ncols();
        let row_count = sample_size(n, self.params.subsample);
        let feature_count = sample_size(n_features, self.params.colsample_bytree);

        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut predictions = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let hess = vec![1.0; n];
        let mut feature_gain = vec![0.0; n_features];
        let mut trees = Vec::new();
        let mut monitor = patience
            .zip(validation)
            .map(|(patience, set)| EarlyStopping::new(set, base_score, patience));

        for _ in 0..self.params.n_rounds {
            for (g, (pred, target)) in grad.iter_mut().zip(predictions.iter().zip(y.iter())) {
                *g = pred - target;
            }
            let mut rows = sample(&mut rng, n, row_count).into_vec();
            rows.sort_unstable();
            let mut features = sample(&mut rng, n_features, feature_count).into_vec();
            features.sort_unstable();

            let builder = TreeBuilder {
                bins: &bins,
                cuts: &cuts,
                grad: &grad,
                hess: &hess,
                features: &features,
                params: &self.params,
            };
            let tree = builder.build(&rows, &mut feature_gain);
            for (pred, row) in predictions.iter_mut().zip(x.values().rows()) {
                *pred += tree.predict_row(row);
            }
            let stop = monitor
                .as_mut()
                .is_some_and(|monitor| monitor.observe(&tree, trees.len()));
            trees.push(tree);
            if stop {
                break;
            }
        }

        Ok(TrainedModel {
            feature_names: x.names().to_vec(),
            base_score,
            trees,
            best_rounds: monitor.map(|monitor| monitor.best_round + 1),
            feature_gain,
        })
    }
}

/// Validation RMSE tracker; improvement must be strict.
struct EarlyStopping<'a> {
    x: &'a FeatureMatrix,
    y: Vec<f64>,
    predictions: Vec<f64>,
    patience: usize,
    best_round: usize,
    best_score: f64,
}

impl<'a> EarlyStopping<'a> {
    fn new(set: Validation<'a>, base_score: f64, patience: usize) -> Self {
        Self {
            x: set.x,
            y: set.y.to_vec(),
            predictions: vec![base_score; set.x.nrows()],
            patience,
            best_round: 0,
            best_score: f64::INFINITY,
        }
    }

    /// Adds `tree` (the tree of round `round`) and returns whether training should stop.
    fn observe(&mut self, tree: &RegressionTree, round: usize) -> bool {
        for (pred, row) in self.predictions.iter_mut().zip(self.x.values().rows()) {
            *pred += tree.predict_row(row);
        }
        let score = metrics::rmse(&self.y, &self.predictions);
        if score < self.best_score {
            self.best_score = score;
            self.best_round = round;
        }
        round - self.best_round >= self.patience
    }
}

fn sample_size(total: usize, fraction: f64) -> usize {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let wanted = (total as f64 * fraction).round() as usize;
    wanted.clamp(1, total.max(1)).min(total)
}
