//! Feature preprocessing: time indexing, satellite imputation, feature/target split, standardization.

/// Feature standardizer.
pub mod scaler;
/// Site input sources.
pub mod source;
/// Future covariate synthesis for the combined-history strategy.
pub mod synthesis;

use indexmap::IndexMap;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ForecastError, ForecastResult},
    frame::SiteFrame,
};
use scaler::Standardizer;
use source::SiteData;
use synthesis::{synthesize_future, FutureSynthesis};

/// Names of the columns the pipeline works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    /// `year, month, day, hour` columns used to build timestamps.
    #[serde(default = "default_time_columns")]
    pub time: Vec<String>,
    /// Declared feature columns, in matrix order.
    #[serde(default = "default_feature_columns")]
    pub features: Vec<String>,
    /// Satellite-derived columns that get mean imputation.
    #[serde(default = "default_satellite_columns")]
    pub satellite: Vec<String>,
    /// Regression targets.
    #[serde(default = "default_target_columns")]
    pub targets: Vec<String>,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            time: default_time_columns(),
            features: default_feature_columns(),
            satellite: default_satellite_columns(),
            targets: default_target_columns(),
        }
    }
}

impl ColumnLayout {
    /// Output column carrying predictions for `target` (`O3_target` -> `O3_predicted`).
    #[must_use]
    pub fn prediction_column(target: &str) -> String {
        let stem = target.strip_suffix("_target").unwrap_or(target);
        format!("{stem}_predicted")
    }

    /// Feature columns that are covariates rather than time components.
    pub fn covariates(&self) -> impl Iterator<Item = &str> {
        self.features
            .iter()
            .filter(|name| !self.time.contains(name))
            .map(String::as_str)
    }
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

fn default_time_columns() -> Vec<String> {
    to_strings(&["year", "month", "day", "hour"])
}

fn default_feature_columns() -> Vec<String> {
    to_strings(&[
        "year",
        "month",
        "day",
        "hour",
        "O3_forecast",
        "NO2_forecast",
        "T_forecast",
        "q_forecast",
        "u_forecast",
        "v_forecast",
        "w_forecast",
        "NO2_satellite",
        "HCHO_satellite",
        "ratio_satellite",
    ])
}

fn default_satellite_columns() -> Vec<String> {
    to_strings(&["NO2_satellite", "HCHO_satellite", "ratio_satellite"])
}

fn default_target_columns() -> Vec<String> {
    to_strings(&["O3_target", "NO2_target"])
}

/// Numeric matrix with one name per column.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

/// Feature matrix `X`: one row per record, one column per feature.
pub type FeatureMatrix = NamedMatrix;
/// Target matrix `y`: one column per pollutant target.
pub type TargetMatrix = NamedMatrix;

impl NamedMatrix {
    /// Wraps `values`; the column count must match `names`.
    pub fn new(names: Vec<String>, values: Array2<f64>) -> ForecastResult<Self> {
        if names.len() != values.ncols() {
            return Err(ForecastError::Schema(format!(
                "{} names for {} columns",
                names.len(),
                values.ncols()
            )));
        }
        Ok(Self { names, values })
    }

    /// Gathers the named frame columns into a matrix.
    pub fn from_frame(frame: &SiteFrame, names: &[String]) -> ForecastResult<Self> {
        let columns = names
            .iter()
            .map(|name| {
                frame
                    .column(name)
                    .ok_or_else(|| ForecastError::Schema(format!("missing column {name:?}")))
            })
            .collect::<ForecastResult<Vec<_>>>()?;
        let values = Array2::from_shape_fn((frame.len(), names.len()), |(row, col)| {
            columns[col][row]
        });
        Self::new(names.to_vec(), values)
    }

    /// Column names.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Underlying values.
    #[must_use]
    pub const fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Number of rows.
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    /// Number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// One column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let idx = self.names.iter().position(|candidate| candidate == name)?;
        Some(self.values.column(idx))
    }

    /// New matrix made of the given rows.
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            values: self.values.select(ndarray::Axis(0), rows),
        }
    }
}

/// Per-column means used to fill missing satellite values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationMeans(IndexMap<String, f64>);

impl ImputationMeans {
    /// Mean recorded for a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<f64> {
        self.0.get(column).copied()
    }

    /// Recorded columns and means.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, mean)| (name.as_str(), *mean))
    }
}

/// How training and inference rows are derived from a site's two input tables.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessStrategy {
    /// Train on the training table; predict (and evaluate if possible) the unseen table.
    SplitSources,
    /// Train on the combined, time-indexed history; predict a synthesized future horizon.
    CombinedHistory(FutureSynthesis),
}

/// Output of [`Preprocessor::prepare`]: scaled training data and scaled inference rows.
#[derive(Debug, Clone)]
pub struct PreparedSite {
    /// Scaled training features.
    pub train_x: FeatureMatrix,
    /// Training targets aligned with `train_x`.
    pub train_y: TargetMatrix,
    /// Standardizer fitted on the raw training features.
    pub standardizer: Standardizer,
    /// Satellite means fitted on the training rows.
    pub means: ImputationMeans,
    /// Scaled features of the rows to forecast.
    pub inference_x: FeatureMatrix,
    /// Records behind `inference_x`, written out with the predictions.
    pub inference_frame: SiteFrame,
}

/// Stateless preprocessor parameterised by a column layout and a strategy.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    layout: ColumnLayout,
    strategy: PreprocessStrategy,
}

impl Preprocessor {
    /// Creates a preprocessor.
    #[must_use]
    pub const fn new(layout: ColumnLayout, strategy: PreprocessStrategy) -> Self {
        Self { layout, strategy }
    }

    /// Column layout in use.
    #[must_use]
    pub const fn layout(&self) -> &ColumnLayout {
        &self.layout
    }

    /// Strategy in use.
    #[must_use]
    pub const fn strategy(&self) -> &PreprocessStrategy {
        &self.strategy
    }

    /// Drops rows with unresolvable timestamps and sorts chronologically.
    pub fn index_by_time(&self, frame: &mut SiteFrame) -> usize {
        frame.index_by_time(&self.layout.time)
    }

    /// Fills missing satellite values with `reference` means, or with the frame's own column
    /// means when no reference (or no reference entry) exists. Returns the means applied.
    pub fn impute_satellite(
        &self,
        frame: &mut SiteFrame,
        reference: Option<&ImputationMeans>,
    ) -> ImputationMeans {
        let mut applied = IndexMap::new();
        for name in &self.layout.satellite {
            let Some(column) = frame.column_mut(name) else {
                continue;
            };
            let mean = reference
                .and_then(|means| means.get(name))
                .unwrap_or_else(|| nan_mean(column));
            if mean.is_finite() {
                for value in column.iter_mut().filter(|value| value.is_nan()) {
                    *value = mean;
                }
            }
            applied.insert(name.clone(), mean);
        }
        ImputationMeans(applied)
    }

    /// Selects declared features present in the frame and, when every target column exists,
    /// the targets. Rows missing any target are dropped from the frame first.
    pub fn split_features_targets(
        &self,
        frame: &mut SiteFrame,
    ) -> ForecastResult<(FeatureMatrix, Option<TargetMatrix>)> {
        let has_targets = self
            .layout
            .targets
            .iter()
            .all(|target| frame.has_column(target));
        let targets = if has_targets {
            let keep: Vec<bool> = (0..frame.len())
                .map(|row| {
                    self.layout.targets.iter().all(|target| {
                        frame
                            .column(target)
                            .is_some_and(|column| !column[row].is_nan())
                    })
                })
                .collect();
            frame.retain_rows(&keep);
            Some(NamedMatrix::from_frame(frame, &self.layout.targets)?)
        } else {
            None
        };
        Ok((self.features(frame)?, targets))
    }

    /// Declared features present in the frame, without dropping rows.
    pub fn features(&self, frame: &SiteFrame) -> ForecastResult<FeatureMatrix> {
        let present: Vec<String> = self
            .layout
            .features
            .iter()
            .filter(|name| frame.has_column(name))
            .cloned()
            .collect();
        if present.is_empty() {
            return Err(ForecastError::Schema(
                "none of the declared feature columns are present".into(),
            ));
        }
        NamedMatrix::from_frame(frame, &present)
    }

    /// Fits a standardizer on `x` and returns the scaled matrix with it.
    pub fn fit_transform(&self, x: &FeatureMatrix) -> ForecastResult<(FeatureMatrix, Standardizer)> {
        let standardizer = Standardizer::fit(x);
        let scaled = standardizer.transform(x)?;
        Ok((scaled, standardizer))
    }

    /// Scales `x` with an already fitted standardizer.
    pub fn transform(
        &self,
        x: &FeatureMatrix,
        standardizer: &Standardizer,
    ) -> ForecastResult<FeatureMatrix> {
        standardizer.transform(x)
    }

    /// Runs the configured strategy over a site's raw tables.
    pub fn prepare(&self, data: SiteData) -> ForecastResult<PreparedSite> {
        match &self.strategy {
            PreprocessStrategy::SplitSources => self.prepare_split_sources(data),
            PreprocessStrategy::CombinedHistory(synthesis) => {
                self.prepare_combined_history(data, synthesis)
            }
        }
    }

    fn prepare_split_sources(&self, data: SiteData) -> ForecastResult<PreparedSite> {
        let SiteData {
            site,
            mut train,
            mut unseen,
        } = data;
        self.index_by_time(&mut train);
        self.index_by_time(&mut unseen);
        let means = self.impute_satellite(&mut train, None);
        let (raw_x, raw_y) = self.split_features_targets(&mut train)?;
        let train_y = raw_y.ok_or_else(|| {
            ForecastError::Schema(format!("site {site}: training data lacks target columns"))
        })?;
        let (train_x, standardizer) = self.fit_transform(&raw_x)?;

        self.impute_satellite(&mut unseen, Some(&means));
        let inference_raw = NamedMatrix::from_frame(&unseen, standardizer.names())?;
        let inference_x = self.transform(&inference_raw, &standardizer)?;
        Ok(PreparedSite {
            train_x,
            train_y,
            standardizer,
            means,
            inference_x,
            inference_frame: unseen,
        })
    }

    fn prepare_combined_history(
        &self,
        data: SiteData,
        synthesis: &FutureSynthesis,
    ) -> ForecastResult<PreparedSite> {
        let SiteData {
            site,
            train,
            mut unseen,
        } = data;
        for target in &self.layout.targets {
            unseen.remove_column(target);
        }
        let mut history = SiteFrame::concat(&[&train, &unseen]);
        self.index_by_time(&mut history);
        if history.is_empty() {
            return Err(ForecastError::EmptyDataset(format!(
                "site {site}: no time-resolvable history rows"
            )));
        }
        let means = self.impute_satellite(&mut history, None);

        let mut labelled = history.clone();
        let (raw_x, raw_y) = self.split_features_targets(&mut labelled)?;
        let train_y = raw_y.ok_or_else(|| {
            ForecastError::Schema(format!("site {site}: training data lacks target columns"))
        })?;
        let (train_x, standardizer) = self.fit_transform(&raw_x)?;

        let mut future = synthesize_future(&history, &self.layout, synthesis)?;
        self.impute_satellite(&mut future, Some(&means));
        let future_raw = NamedMatrix::from_frame(&future, standardizer.names())?;
        let inference_x = self.transform(&future_raw, &standardizer)?;
        Ok(PreparedSite {
            train_x,
            train_y,
            standardizer,
            means,
            inference_x,
            inference_frame: future,
        })
    }
}

/// Mean of the non-missing values, `NaN` when there are none.
#[must_use]
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        #[allow(clippy::cast_precision_loss)]
        let count = count as f64;
        sum / count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(ColumnLayout::default(), PreprocessStrategy::SplitSources)
    }

    fn small_frame() -> SiteFrame {
        SiteFrame::from_columns([
            ("year", vec![2024.0, 2024.0, 2024.0, 2024.0]),
            ("month", vec![1.0; 4]),
            ("day", vec![1.0; 4]),
            ("hour", vec![0.0, 1.0, 2.0, 3.0]),
            ("T_forecast", vec![280.0, 281.0, 282.0, 283.0]),
            ("NO2_satellite", vec![1.0, f64::NAN, 3.0, f64::NAN]),
            ("O3_target", vec![30.0, 31.0, f64::NAN, 33.0]),
            ("NO2_target", vec![10.0, f64::NAN, 12.0, 13.0]),
        ])
        .unwrap()
    }

    #[test]
    fn imputes_with_own_mean_then_with_reference() {
        let pre = preprocessor();
        let mut train = small_frame();
        let means = pre.impute_satellite(&mut train, None);
        assert_eq!(means.get("NO2_satellite"), Some(2.0));
        assert_eq!(train.column("NO2_satellite").unwrap(), &[1.0, 2.0, 3.0, 2.0]);

        let mut future =
            SiteFrame::from_columns([("NO2_satellite", vec![f64::NAN, 100.0])]).unwrap();
        pre.impute_satellite(&mut future, Some(&means));
        // Reference mean, not the future frame's own mean (100).
        assert_eq!(future.column("NO2_satellite").unwrap(), &[2.0, 100.0]);
    }

    #[test]
    fn rows_missing_either_target_are_dropped() {
        let pre = preprocessor();
        let mut frame = small_frame();
        let (x, y) = pre.split_features_targets(&mut frame).unwrap();
        let y = y.unwrap();
        assert_eq!(x.nrows(), 2);
        assert_eq!(y.nrows(), 2);
        assert_eq!(y.column("O3_target").unwrap().to_vec(), vec![30.0, 33.0]);
        assert_eq!(y.column("NO2_target").unwrap().to_vec(), vec![10.0, 13.0]);
        assert_eq!(frame.column("hour").unwrap(), &[0.0, 3.0]);
    }

    #[test]
    fn unseen_table_without_targets_yields_none() {
        let pre = preprocessor();
        let mut frame = small_frame();
        frame.remove_column("O3_target");
        frame.remove_column("NO2_target");
        let (x, y) = pre.split_features_targets(&mut frame).unwrap();
        assert!(y.is_none());
        assert_eq!(x.nrows(), 4);
        // Declared order, intersected with present columns.
        assert_eq!(
            x.names(),
            &["year", "month", "day", "hour", "T_forecast", "NO2_satellite"]
        );
    }

    #[test]
    fn a_single_present_target_is_treated_as_absent() {
        let pre = preprocessor();
        let mut frame = small_frame();
        frame.remove_column("NO2_target");
        let (x, y) = pre.split_features_targets(&mut frame).unwrap();
        assert!(y.is_none());
        assert_eq!(x.nrows(), 4);
    }

    #[test]
    fn prediction_column_names_follow_targets() {
        assert_eq!(ColumnLayout::prediction_column("O3_target"), "O3_predicted");
        assert_eq!(ColumnLayout::prediction_column("PM25"), "PM25_predicted");
    }

    #[test]
    fn split_sources_uses_training_statistics_for_unseen_rows() {
        let pre = preprocessor();
        let train = small_frame();
        let unseen = SiteFrame::from_columns([
            ("year", vec![2024.0]),
            ("month", vec![1.0]),
            ("day", vec![2.0]),
            ("hour", vec![0.0]),
            ("T_forecast", vec![290.0]),
            ("NO2_satellite", vec![f64::NAN]),
        ])
        .unwrap();
        let prepared = pre
            .prepare(SiteData {
                site: 1,
                train,
                unseen,
            })
            .unwrap();
        assert_eq!(prepared.train_x.nrows(), 2);
        assert_eq!(prepared.inference_x.nrows(), 1);
        assert_eq!(prepared.inference_frame.column("NO2_satellite").unwrap(), &[2.0]);
        let scaled_sat = prepared.inference_x.column("NO2_satellite").unwrap()[0];
        assert!(scaled_sat.is_finite());
    }

    #[test]
    fn split_sources_rejects_unseen_table_missing_a_feature() {
        let pre = preprocessor();
        let unseen = SiteFrame::from_columns([("year", vec![2024.0])]).unwrap();
        let result = pre.prepare(SiteData {
            site: 2,
            train: small_frame(),
            unseen,
        });
        assert!(matches!(result, Err(ForecastError::Schema(_))));
    }
}
