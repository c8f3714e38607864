//! Regression metrics over paired observed/predicted series.
//!
//! Every function first drops positions whose observed value is `NaN` and works on the
//! remaining pairs. With no pairs left the result is `NaN`, the undefined-metric sentinel.

/// Metric normalization rubric and combined score.
pub mod rubric;

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Metric identifiers, in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Metric {
    /// Root mean squared error.
    #[serde(rename = "RMSE")]
    Rmse,
    /// Coefficient of determination.
    #[serde(rename = "R2")]
    R2,
    /// Refined index of agreement.
    #[serde(rename = "RIA")]
    Ria,
    /// Mean absolute error.
    #[serde(rename = "MAE")]
    Mae,
    /// Mean signed error (positive means over-prediction).
    #[serde(rename = "Bias")]
    Bias,
}

impl Metric {
    /// All metrics in report order.
    pub const ALL: [Self; 5] = [Self::Rmse, Self::R2, Self::Ria, Self::Mae, Self::Bias];

    /// Report key (`RMSE`, `R2`, `RIA`, `MAE`, `Bias`).
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Rmse => "RMSE",
            Self::R2 => "R2",
            Self::Ria => "RIA",
            Self::Mae => "MAE",
            Self::Bias => "Bias",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = String;

    /// Parses a report key, ignoring case.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.key().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| format!("unknown metric {raw:?}"))
    }
}

// Parsed from a plain string so metric names also work as TOML table keys.
impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// The five metrics for one (site, target) pair. Undefined values are `NaN`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Root mean squared error.
    #[serde(rename = "RMSE", with = "nan_as_null", default = "undefined")]
    pub rmse: f64,
    /// Coefficient of determination.
    #[serde(rename = "R2", with = "nan_as_null", default = "undefined")]
    pub r2: f64,
    /// Refined index of agreement.
    #[serde(rename = "RIA", with = "nan_as_null", default = "undefined")]
    pub ria: f64,
    /// Mean absolute error.
    #[serde(rename = "MAE", with = "nan_as_null", default = "undefined")]
    pub mae: f64,
    /// Mean signed error.
    #[serde(rename = "Bias", with = "nan_as_null", default = "undefined")]
    pub bias: f64,
}

impl MetricsRecord {
    /// Record where every metric is undefined.
    #[must_use]
    pub const fn undefined() -> Self {
        Self {
            rmse: f64::NAN,
            r2: f64::NAN,
            ria: f64::NAN,
            mae: f64::NAN,
            bias: f64::NAN,
        }
    }

    /// Computes every metric over the valid pairs of `observed`/`predicted`.
    #[must_use]
    pub fn compute(observed: &[f64], predicted: &[f64]) -> Self {
        let pairs = valid_pairs(observed, predicted);
        if pairs.is_empty() {
            return Self::undefined();
        }
        Self {
            rmse: rmse_pairs(&pairs),
            r2: r2_pairs(&pairs),
            ria: ria_pairs(&pairs),
            mae: mae_pairs(&pairs),
            bias: bias_pairs(&pairs),
        }
    }

    /// Value of one metric, `None` when undefined.
    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<f64> {
        let value = match metric {
            Metric::Rmse => self.rmse,
            Metric::R2 => self.r2,
            Metric::Ria => self.ria,
            Metric::Mae => self.mae,
            Metric::Bias => self.bias,
        };
        value.is_finite().then_some(value)
    }

    /// Whether every metric is defined.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        Metric::ALL.iter().all(|metric| self.get(*metric).is_some())
    }
}

impl fmt::Display for MetricsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RMSE={:.3} R2={:.3} RIA={:.3} MAE={:.3} Bias={:.3}",
            self.rmse, self.r2, self.ria, self.mae, self.bias
        )
    }
}

const fn undefined() -> f64 {
    f64::NAN
}

mod nan_as_null {
    use super::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Root mean squared error.
#[must_use]
pub fn rmse(observed: &[f64], predicted: &[f64]) -> f64 {
    with_pairs(observed, predicted, rmse_pairs)
}

/// Mean absolute error.
#[must_use]
pub fn mae(observed: &[f64], predicted: &[f64]) -> f64 {
    with_pairs(observed, predicted, mae_pairs)
}

/// Mean of `predicted - observed`.
#[must_use]
pub fn bias(observed: &[f64], predicted: &[f64]) -> f64 {
    with_pairs(observed, predicted, bias_pairs)
}

/// Coefficient of determination against the observed mean.
#[must_use]
pub fn r2(observed: &[f64], predicted: &[f64]) -> f64 {
    with_pairs(observed, predicted, r2_pairs)
}

/// Refined index of agreement: `1 - Σ|p-o| / Σ(|p-ō| + |o-ō|)`, `1.0` when the denominator is zero.
#[must_use]
pub fn refined_index_of_agreement(observed: &[f64], predicted: &[f64]) -> f64 {
    with_pairs(observed, predicted, ria_pairs)
}

fn with_pairs(observed: &[f64], predicted: &[f64], metric: fn(&[(f64, f64)]) -> f64) -> f64 {
    let pairs = valid_pairs(observed, predicted);
    if pairs.is_empty() {
        f64::NAN
    } else {
        metric(&pairs)
    }
}

fn valid_pairs(observed: &[f64], predicted: &[f64]) -> Vec<(f64, f64)> {
    debug_assert_eq!(observed.len(), predicted.len());
    observed
        .iter()
        .zip(predicted)
        .filter(|(obs, _)| !obs.is_nan())
        .map(|(obs, pred)| (*obs, *pred))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn mean_of(pairs: &[(f64, f64)], f: impl Fn(f64, f64) -> f64) -> f64 {
    pairs.iter().map(|(obs, pred)| f(*obs, *pred)).sum::<f64>() / pairs.len() as f64
}

fn observed_mean(pairs: &[(f64, f64)]) -> f64 {
    mean_of(pairs, |obs, _| obs)
}

fn rmse_pairs(pairs: &[(f64, f64)]) -> f64 {
    mean_of(pairs, |obs, pred| (pred - obs).powi(2)).sqrt()
}

fn mae_pairs(pairs: &[(f64, f64)]) -> f64 {
    mean_of(pairs, |obs, pred| (pred - obs).abs())
}

fn bias_pairs(pairs: &[(f64, f64)]) -> f64 {
    mean_of(pairs, |obs, pred| pred - obs)
}

fn r2_pairs(pairs: &[(f64, f64)]) -> f64 {
    let mean = observed_mean(pairs);
    let ss_res: f64 = pairs.iter().map(|(obs, pred)| (obs - pred).powi(2)).sum();
    let ss_tot: f64 = pairs.iter().map(|(obs, _)| (obs - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

fn ria_pairs(pairs: &[(f64, f64)]) -> f64 {
    let mean = observed_mean(pairs);
    let numerator: f64 = pairs.iter().map(|(obs, pred)| (pred - obs).abs()).sum();
    let denominator: f64 = pairs
        .iter()
        .map(|(obs, pred)| (pred - mean).abs() + (obs - mean).abs())
        .sum();
    if denominator == 0.0 {
        return 1.0;
    }
    1.0 - numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ria_is_one_for_perfect_predictions() {
        let obs = [10.0, 20.0, 35.0, 5.0];
        assert!((refined_index_of_agreement(&obs, &obs) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ria_is_one_for_constant_series() {
        let obs = [7.0; 6];
        assert!((refined_index_of_agreement(&obs, &obs) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ria_penalises_disagreement() {
        let obs = [1.0, 2.0, 3.0];
        let pred = [3.0, 2.0, 1.0];
        // numerator 4, denominator (1+1)+(0+0)+(1+1) = 4
        assert!(refined_index_of_agreement(&obs, &pred).abs() < 1e-12);
    }

    #[test]
    fn known_values() {
        let obs = [1.0, 2.0, 3.0, 4.0];
        let pred = [2.0, 2.0, 3.0, 6.0];
        assert!((rmse(&obs, &pred) - (5.0_f64 / 4.0).sqrt()).abs() < 1e-12);
        assert!((mae(&obs, &pred) - 0.75).abs() < 1e-12);
        assert!((bias(&obs, &pred) - 0.75).abs() < 1e-12);
        // ss_res = 5, ss_tot = 5
        assert!(r2(&obs, &pred).abs() < 1e-12);
    }

    #[test]
    fn masks_missing_observations() {
        let obs = [1.0, f64::NAN, 3.0];
        let pred = [1.0, 1000.0, 3.0];
        let record = MetricsRecord::compute(&obs, &pred);
        assert!(record.rmse.abs() < f64::EPSILON);
        assert!((record.r2 - 1.0).abs() < f64::EPSILON);
        assert!(record.is_complete());
    }

    #[test]
    fn no_valid_pairs_is_undefined_not_an_error() {
        let record = MetricsRecord::compute(&[f64::NAN, f64::NAN], &[1.0, 2.0]);
        assert!(Metric::ALL.iter().all(|metric| record.get(*metric).is_none()));
        assert!(rmse(&[], &[]).is_nan());
    }

    #[test]
    fn r2_for_constant_observations() {
        assert!((r2(&[4.0, 4.0], &[4.0, 4.0]) - 1.0).abs() < f64::EPSILON);
        assert!(r2(&[4.0, 4.0], &[3.0, 5.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn metric_names_parse_case_insensitively() {
        assert_eq!("rmse".parse::<Metric>(), Ok(Metric::Rmse));
        assert_eq!("BIAS".parse::<Metric>(), Ok(Metric::Bias));
        assert!("mape".parse::<Metric>().is_err());
    }

    #[test]
    fn record_json_uses_report_keys_and_null_for_undefined() {
        let record = MetricsRecord {
            rmse: 1.5,
            ..MetricsRecord::undefined()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"RMSE":1.5,"R2":null,"RIA":null,"MAE":null,"Bias":null}"#
        );
        let parsed: MetricsRecord = serde_json::from_str(r#"{"RMSE":2.0,"Bias":-1.0}"#).unwrap();
        assert_eq!(parsed.get(Metric::Rmse), Some(2.0));
        assert_eq!(parsed.get(Metric::Bias), Some(-1.0));
        assert!(parsed.get(Metric::R2).is_none());
    }
}
