use indexmap::IndexMap;
use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    booster::{GradientBooster, TrainedModel, Validation},
    error::{ForecastError, ForecastResult},
    metrics::MetricsRecord,
    preprocess::{FeatureMatrix, TargetMatrix},
};

/// How rows are divided into fit, validation and test subsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Share of rows held out for the reported test metrics.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    /// Random test subset instead of the most recent rows.
    #[serde(default)]
    pub shuffle: bool,
    /// Share of the training split used for early stopping.
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    /// Seed for every random subset.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            shuffle: false,
            validation_fraction: default_validation_fraction(),
            seed: default_seed(),
        }
    }
}

const fn default_test_fraction() -> f64 {
    0.2
}

const fn default_validation_fraction() -> f64 {
    0.1
}

const fn default_seed() -> u64 {
    42
}

/// Row indices of each subset. The three sets are disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    /// Rows the booster fits on.
    pub fit: Vec<usize>,
    /// Rows scored for early stopping.
    pub validation: Vec<usize>,
    /// Rows behind the reported metrics.
    pub test: Vec<usize>,
}

impl SplitConfig {
    /// Rejects fractions outside `[0, 1)`.
    pub fn validate(&self) -> ForecastResult<()> {
        for (name, value) in [
            ("test_fraction", self.test_fraction),
            ("validation_fraction", self.validation_fraction),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ForecastError::Config(format!(
                    "split.{name} {value} must be in [0, 1)"
                )));
            }
        }
        Ok(())
    }

    /// Splits `n` time-ordered rows. At least one row is always left to fit on.
    #[must_use]
    pub fn plan(&self, n: usize) -> SplitPlan {
        self.plan_with(n, true)
    }

    /// Like [`Self::plan`]; without a validation subset every training row is a fit row.
    #[must_use]
    pub fn plan_with(&self, n: usize, with_validation: bool) -> SplitPlan {
        let n_test = holdout_size(n, self.test_fraction);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let (train, test) = if self.shuffle {
            let mut test = sample(&mut rng, n, n_test).into_vec();
            test.sort_unstable();
            (complement(n, &test), test)
        } else {
            ((0..n - n_test).collect(), (n - n_test..n).collect())
        };

        if !with_validation {
            return SplitPlan {
                fit: train,
                validation: Vec::new(),
                test,
            };
        }
        let n_valid = holdout_size(train.len(), self.validation_fraction);
        let mut picks = sample(&mut rng, train.len(), n_valid).into_vec();
        picks.sort_unstable();
        let validation: Vec<usize> = picks.iter().map(|&pick| train[pick]).collect();
        let fit = train
            .into_iter()
            .filter(|row| validation.binary_search(row).is_err())
            .collect();
        SplitPlan {
            fit,
            validation,
            test,
        }
    }
}

fn holdout_size(n: usize, fraction: f64) -> usize {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let wanted = (n as f64 * fraction).round() as usize;
    wanted.min(n.saturating_sub(1))
}

fn complement(n: usize, sorted: &[usize]) -> Vec<usize> {
    (0..n).filter(|row| sorted.binary_search(row).is_err()).collect()
}

/// One fitted model per target column, in target order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelSet {
    models: IndexMap<String, TrainedModel>,
}

impl TrainedModelSet {
    /// Model for a target.
    #[must_use]
    pub fn get(&self, target: &str) -> Option<&TrainedModel> {
        self.models.get(target)
    }

    /// Targets with a model.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Target/model pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TrainedModel)> {
        self.models.iter().map(|(target, model)| (target.as_str(), model))
    }

    /// Number of models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model was trained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Training summary for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    /// Target column.
    pub target: String,
    /// Metrics on the held-out test rows.
    pub test_metrics: MetricsRecord,
    /// Best round count when early stopping ran.
    pub best_rounds: Option<usize>,
    /// Rounds trained in total.
    pub rounds_trained: usize,
    /// Why early stopping was not used, if it was not.
    pub fallback: Option<String>,
    /// Features ranked by split gain, most important first.
    pub importance: IndexMap<String, f64>,
}

/// Models plus per-target reports.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Fitted models.
    pub models: TrainedModelSet,
    /// One report per target, in target order.
    pub reports: Vec<TargetReport>,
    /// Subset sizes used.
    pub rows: SplitSizes,
}

/// Row counts of each subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSizes {
    /// Fit rows.
    pub fit: usize,
    /// Validation rows.
    pub validation: usize,
    /// Test rows.
    pub test: usize,
}

/// Fits one booster per target and scores it on a held-out test split.
#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    booster: GradientBooster,
    split: SplitConfig,
}

impl ModelTrainer {
    /// Creates a trainer.
    #[must_use]
    pub const fn new(booster: GradientBooster, split: SplitConfig) -> Self {
        Self { booster, split }
    }

    /// Split settings.
    #[must_use]
    pub const fn split(&self) -> &SplitConfig {
        &self.split
    }

    /// Trains every target column of `y` on the scaled features `x`.
    pub fn train(&self, x: &FeatureMatrix, y: &TargetMatrix) -> ForecastResult<TrainingOutcome> {
        self.split.validate()?;
        if x.nrows() != y.nrows() {
            return Err(ForecastError::Schema(format!(
                "{} feature rows for {} target rows",
                x.nrows(),
                y.nrows()
            )));
        }
        if x.nrows() == 0 {
            return Err(ForecastError::EmptyDataset(
                "no rows with both targets present".into(),
            ));
        }
        let early_stopping = self.booster.params().patience().is_some();
        let plan = self.split.plan_with(x.nrows(), early_stopping);
        let fit_x = x.select_rows(&plan.fit);
        let valid_x = x.select_rows(&plan.validation);
        let test_x = x.select_rows(&plan.test);
        let fit_y = y.select_rows(&plan.fit);
        let valid_y = y.select_rows(&plan.validation);
        let test_y = y.select_rows(&plan.test);

        let fallback = if !early_stopping {
            Some("early stopping disabled".to_string())
        } else if plan.validation.is_empty() {
            Some("validation subset is empty".to_string())
        } else {
            None
        };

        let mut models = IndexMap::new();
        let mut reports = Vec::with_capacity(y.ncols());
        for (idx, target) in y.names().iter().enumerate() {
            let training_error = |err: ForecastError| ForecastError::Training {
                target: target.clone(),
                reason: err.to_string(),
            };
            let model = self
                .booster
                .fit(
                    &fit_x,
                    fit_y.values().column(idx),
                    Some(Validation {
                        x: &valid_x,
                        y: valid_y.values().column(idx),
                    }),
                )
                .map_err(training_error)?;
            let predicted = model.predict(&test_x).map_err(training_error)?;
            let observed = test_y.values().column(idx).to_vec();
            let test_metrics = MetricsRecord::compute(&observed, &predicted.to_vec());
            reports.push(TargetReport {
                target: target.clone(),
                test_metrics,
                best_rounds: model.best_rounds(),
                rounds_trained: model.rounds_trained(),
                fallback: fallback.clone(),
                importance: model.feature_importance(),
            });
            models.insert(target.clone(), model);
        }
        Ok(TrainingOutcome {
            models: TrainedModelSet { models },
            reports,
            rows: SplitSizes {
                fit: plan.fit.len(),
                validation: plan.validation.len(),
                test: plan.test.len(),
            },
        })
    }
}
