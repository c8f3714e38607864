use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Metric, MetricsRecord};
use crate::error::{ForecastError, ForecastResult};

/// Thresholds mapping one metric onto the `[0, 1]` scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Value at (or beyond) which the score is `1.0`.
    pub good: f64,
    /// Value at (or beyond) which the score is `0.0`.
    pub bad: f64,
    /// Whether larger values are better.
    #[serde(default)]
    pub higher_is_better: bool,
}

impl Threshold {
    /// Lower-is-better threshold.
    #[must_use]
    pub const fn lower(good: f64, bad: f64) -> Self {
        Self {
            good,
            bad,
            higher_is_better: false,
        }
    }

    /// Higher-is-better threshold.
    #[must_use]
    pub const fn higher(good: f64, bad: f64) -> Self {
        Self {
            good,
            bad,
            higher_is_better: true,
        }
    }
}

/// Linearly rescales `value` between the bad (`0.0`) and good (`1.0`) thresholds, clamped.
#[must_use]
pub fn normalize_metric(value: f64, threshold: &Threshold) -> f64 {
    let Threshold {
        good,
        bad,
        higher_is_better,
    } = *threshold;
    if higher_is_better {
        if value >= good {
            return 1.0;
        }
        if value <= bad {
            return 0.0;
        }
        (value - bad) / (good - bad)
    } else {
        if value <= good {
            return 1.0;
        }
        if value >= bad {
            return 0.0;
        }
        (bad - value) / (bad - good)
    }
}

/// Per-metric thresholds used to collapse a [`MetricsRecord`] into one score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rubric {
    thresholds: IndexMap<Metric, Threshold>,
}

impl Default for Rubric {
    fn default() -> Self {
        Self::from_thresholds([
            (Metric::Rmse, Threshold::lower(10.0, 20.0)),
            (Metric::Mae, Threshold::lower(8.0, 16.0)),
            (Metric::Bias, Threshold::lower(1.0, 5.0)),
            (Metric::R2, Threshold::higher(0.8, 0.5)),
            (Metric::Ria, Threshold::higher(0.8, 0.5)),
        ])
    }
}

impl Rubric {
    /// Builds a rubric from explicit thresholds; metrics left out are not scored.
    #[must_use]
    pub fn from_thresholds(thresholds: impl IntoIterator<Item = (Metric, Threshold)>) -> Self {
        Self {
            thresholds: thresholds.into_iter().collect(),
        }
    }

    /// Variant with wider error bands (RMSE 12/20, MAE 9/16).
    #[must_use]
    pub fn lenient() -> Self {
        let mut rubric = Self::default();
        rubric.set(Metric::Rmse, Threshold::lower(12.0, 20.0));
        rubric.set(Metric::Mae, Threshold::lower(9.0, 16.0));
        rubric
    }

    /// Replaces one metric's threshold.
    pub fn set(&mut self, metric: Metric, threshold: Threshold) {
        self.thresholds.insert(metric, threshold);
    }

    /// Threshold for one metric.
    #[must_use]
    pub fn threshold(&self, metric: Metric) -> Option<&Threshold> {
        self.thresholds.get(&metric)
    }

    /// Rejects non-finite thresholds and thresholds ordered against their direction.
    pub fn validate(&self) -> ForecastResult<()> {
        for (metric, threshold) in &self.thresholds {
            if !threshold.good.is_finite() || !threshold.bad.is_finite() {
                return Err(ForecastError::Config(format!(
                    "rubric {metric}: thresholds must be finite"
                )));
            }
            let inverted = if threshold.higher_is_better {
                threshold.good < threshold.bad
            } else {
                threshold.good > threshold.bad
            };
            if inverted {
                return Err(ForecastError::Config(format!(
                    "rubric {metric}: good threshold lies on the bad side"
                )));
            }
        }
        Ok(())
    }

    /// Normalizes every defined metric the rubric covers and averages the scores.
    /// Bias is scored by magnitude. With nothing scorable the combined score is `0.0`.
    #[must_use]
    pub fn combined_score(&self, record: &MetricsRecord) -> CombinedScore {
        let mut normalized = IndexMap::new();
        for (metric, threshold) in &self.thresholds {
            let Some(value) = record.get(*metric) else {
                continue;
            };
            let value = if *metric == Metric::Bias {
                value.abs()
            } else {
                value
            };
            normalized.insert(*metric, normalize_metric(value, threshold));
        }
        let score = if normalized.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let count = normalized.len() as f64;
            normalized.values().sum::<f64>() / count
        };
        CombinedScore { score, normalized }
    }
}

/// Combined score of `record` under `rubric`.
#[must_use]
pub fn combined_score(record: &MetricsRecord, rubric: &Rubric) -> CombinedScore {
    rubric.combined_score(record)
}

/// Combined score with the per-metric normalized scores behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedScore {
    /// Unweighted mean of `normalized`.
    pub score: f64,
    /// Normalized score per metric that could be computed.
    pub normalized: IndexMap<Metric, f64>,
}
