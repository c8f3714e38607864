use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

use super::{nan_mean, FeatureMatrix, NamedMatrix};
use crate::error::{ForecastError, ForecastResult};

/// Standard deviations below this are treated as zero variance and get a scale of `1.0`.
pub const SCALE_FLOOR: f64 = 1e-12;

/// Per-feature mean and scale fitted once on a training matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    names: Vec<String>,
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    /// Fits population statistics per column, ignoring missing cells.
    #[must_use]
    pub fn fit(x: &FeatureMatrix) -> Self {
        let mut mean = Array1::zeros(x.ncols());
        let mut scale = Array1::ones(x.ncols());
        for (idx, column) in x.values().columns().into_iter().enumerate() {
            let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
            let mu = nan_mean(&observed);
            if !mu.is_finite() {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let variance =
                observed.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / observed.len() as f64;
            let std = variance.sqrt();
            mean[idx] = mu;
            scale[idx] = if std.is_finite() && std >= SCALE_FLOOR {
                std
            } else {
                1.0
            };
        }
        Self {
            names: x.names().to_vec(),
            mean,
            scale,
        }
    }

    /// Applies `(x - mean) / scale`. The matrix columns must match the fitted columns exactly.
    pub fn transform(&self, x: &FeatureMatrix) -> ForecastResult<FeatureMatrix> {
        if x.names() != self.names.as_slice() {
            return Err(ForecastError::Schema(format!(
                "standardizer fitted on {:?} cannot transform {:?}",
                self.names,
                x.names()
            )));
        }
        let mut values = x.values().clone();
        for mut row in values.rows_mut() {
            Zip::from(&mut row)
                .and(&self.mean)
                .and(&self.scale)
                .for_each(|value, mean, scale| *value = (*value - mean) / scale);
        }
        NamedMatrix::new(self.names.clone(), values)
    }

    /// Feature names, in column order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Fitted means.
    #[must_use]
    pub const fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Fitted scales (never zero).
    #[must_use]
    pub const fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix(values: ndarray::Array2<f64>) -> FeatureMatrix {
        let names = (0..values.ncols()).map(|idx| format!("f{idx}")).collect();
        NamedMatrix::new(names, values).unwrap()
    }

    #[test]
    fn refitted_data_has_zero_mean_unit_variance() {
        let x = matrix(array![
            [1.0, 10.0, 5.0],
            [2.0, 20.0, 5.0],
            [3.0, 35.0, 5.0],
            [4.0, 41.0, 5.0],
        ]);
        let scaler = Standardizer::fit(&x);
        let scaled = scaler.transform(&x).unwrap();
        for idx in 0..2 {
            let column = scaled.values().column(idx);
            let mean = column.sum() / 4.0;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-9);
            assert!((var - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_column_stays_finite() {
        let x = matrix(array![[7.0], [7.0], [7.0]]);
        let scaler = Standardizer::fit(&x);
        assert!((scaler.scale()[0] - 1.0).abs() < f64::EPSILON);
        let scaled = scaler.transform(&x).unwrap();
        assert!(scaled.values().iter().all(|v| v.is_finite() && v.abs() < 1e-12));
        let unseen = scaler.transform(&matrix(array![[9.0]])).unwrap();
        assert!((unseen.values()[[0, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn transform_never_refits() {
        let scaler = Standardizer::fit(&matrix(array![[0.0], [2.0]]));
        let shifted = scaler.transform(&matrix(array![[100.0], [102.0]])).unwrap();
        assert!((shifted.values()[[0, 0]] - 99.0).abs() < 1e-12);
        assert!((shifted.values()[[1, 0]] - 101.0).abs() < 1e-12);
    }

    #[test]
    fn missing_cells_are_ignored_and_preserved() {
        let scaler = Standardizer::fit(&matrix(array![[1.0], [f64::NAN], [3.0]]));
        assert!((scaler.mean()[0] - 2.0).abs() < f64::EPSILON);
        let scaled = scaler.transform(&matrix(array![[f64::NAN]])).unwrap();
        assert!(scaled.values()[[0, 0]].is_nan());
    }

    #[test]
    fn column_mismatch_is_rejected() {
        let scaler = Standardizer::fit(&matrix(array![[1.0, 2.0]]));
        let other = NamedMatrix::new(vec!["f1".into(), "f0".into()], array![[1.0, 2.0]]).unwrap();
        assert!(scaler.transform(&other).is_err());
    }
}
