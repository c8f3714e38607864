use std::path::PathBuf;

use airq_forecasting::{
    frame::SiteFrame, ArtifactLayout, ColumnLayout, ForecastConfig, ForecastError, Metric,
    MetricsRecord, Rubric, SiteId, SiteMetrics,
};
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

/// Number of forecast rows returned when no horizon is requested.
pub const DEFAULT_HORIZON: usize = 24;

/// Timestamp rendering used in forecast rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column renames applied to served forecast rows.
const SERVED_NAMES: [(&str, &str); 4] = [
    ("O3_predicted", "O3_pred"),
    ("NO2_predicted", "NO2_pred"),
    ("O3_target", "O3_true"),
    ("NO2_target", "NO2_true"),
];

/// Errors raised while reading persisted artifacts.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Site is not part of the configured set.
    #[error("site {0} not found")]
    UnknownSite(SiteId),
    /// The site's artifact has not been produced.
    #[error("{kind} file not found for site {site}")]
    NotFound {
        /// Site queried.
        site: SiteId,
        /// `prediction` or `metrics`.
        kind: &'static str,
        /// Expected location.
        path: PathBuf,
    },
    /// The metrics document has no entry for the pollutant.
    #[error("metrics not found for {pollutant} at site {site}")]
    MetricsMissing {
        /// Site queried.
        site: SiteId,
        /// Pollutant stem (e.g. `O3`).
        pollutant: String,
    },
    /// The artifact exists but could not be read.
    #[error("reading artifact: {0}")]
    Read(#[from] ForecastError),
    /// CSV rendering failed.
    #[error("rendering csv: {0}")]
    Render(#[from] csv::Error),
    /// Filesystem failure while rendering.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One served forecast row: timestamp plus every column, missing cells as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRow {
    /// `YYYY-mm-dd HH:MM:SS`.
    pub timestamp: String,
    /// Column values under their served names.
    #[serde(flatten)]
    pub values: IndexMap<String, Option<f64>>,
}

/// Forecast rows for one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteForecast {
    /// Site identifier.
    pub site: SiteId,
    /// Requested horizon.
    pub horizon: usize,
    /// Rows sorted by timestamp, at most `horizon` of them.
    pub data: Vec<ForecastRow>,
}

/// Metrics for one (site, pollutant) with the rubric applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteMetricsView {
    /// Site identifier.
    pub site: SiteId,
    /// Pollutant stem as requested.
    pub pollutant: String,
    /// Raw metrics.
    pub metrics: MetricsRecord,
    /// Mean of the normalized scores.
    pub combined_score: f64,
    /// Normalized score per computable metric.
    pub normalized_scores: IndexMap<Metric, f64>,
}

/// Flat metrics row used by the all-sites listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRow {
    /// Site identifier.
    pub site: SiteId,
    /// Target key as stored (e.g. `O3_target`).
    pub pollutant: String,
    /// Raw metrics, flattened into the row.
    #[serde(flatten)]
    pub metrics: MetricsRecord,
    /// Mean of the normalized scores.
    pub combined_score: f64,
    /// Normalized score per computable metric.
    pub normalized_scores: IndexMap<Metric, f64>,
}

/// Read-only view over the artifacts a batch run persisted.
#[derive(Debug, Clone)]
pub struct ArtifactCatalog {
    layout: ArtifactLayout,
    sites: Vec<SiteId>,
    time_columns: Vec<String>,
    rubric: Rubric,
}

impl ArtifactCatalog {
    /// Catalog over `layout` serving `sites`, scored with the default rubric.
    #[must_use]
    pub fn new(layout: ArtifactLayout, sites: Vec<SiteId>) -> Self {
        Self {
            layout,
            sites,
            time_columns: ColumnLayout::default().time,
            rubric: Rubric::default(),
        }
    }

    /// Catalog matching a forecasting configuration.
    #[must_use]
    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            layout: config.artifact_layout(),
            sites: config.sites.clone(),
            time_columns: config.columns.time.clone(),
            rubric: config.rubric.clone(),
        }
    }

    /// Replaces the rubric used for combined scores.
    #[must_use]
    pub fn with_rubric(mut self, rubric: Rubric) -> Self {
        self.rubric = rubric;
        self
    }

    /// Configured site ids.
    #[must_use]
    pub fn sites(&self) -> &[SiteId] {
        &self.sites
    }

    /// Prediction rows sorted by timestamp and truncated to `horizon`, with served column names.
    pub fn site_forecast(&self, site: SiteId, horizon: usize) -> Result<SiteForecast, CatalogError> {
        let (frame, stamps) = self.forecast_frame(site, horizon)?;
        let names: Vec<(&str, String)> = frame
            .column_names()
            .map(|name| (name, served_name(name)))
            .collect();
        let data = stamps
            .into_iter()
            .enumerate()
            .map(|(row, timestamp)| ForecastRow {
                timestamp,
                values: names
                    .iter()
                    .map(|(name, served)| {
                        let value = frame.column(name).map_or(f64::NAN, |column| column[row]);
                        (served.clone(), value.is_finite().then_some(value))
                    })
                    .collect(),
            })
            .collect();
        Ok(SiteForecast {
            site,
            horizon,
            data,
        })
    }

    /// The same rows as [`Self::site_forecast`], with stored column names plus `timestamp`, as CSV.
    pub fn forecast_csv(&self, site: SiteId, horizon: usize) -> Result<String, CatalogError> {
        let (frame, stamps) = self.forecast_frame(site, horizon)?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(frame.column_names().chain(["timestamp"]))?;
        for (row, stamp) in stamps.iter().enumerate() {
            let mut record: Vec<String> = frame
                .column_names()
                .map(|name| {
                    frame
                        .column(name)
                        .map(|column| column[row])
                        .filter(|value| !value.is_nan())
                        .map(|value| value.to_string())
                        .unwrap_or_default()
                })
                .collect();
            record.push(stamp.clone());
            writer.write_record(&record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| CatalogError::Io(err.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Metrics for `{pollutant}_target` with combined and normalized scores.
    pub fn site_metrics(&self, site: SiteId, pollutant: &str) -> Result<SiteMetricsView, CatalogError> {
        let document = self.metrics_document(site)?;
        let metrics = document
            .get(&format!("{pollutant}_target"))
            .copied()
            .ok_or_else(|| CatalogError::MetricsMissing {
                site,
                pollutant: pollutant.to_string(),
            })?;
        let combined = self.rubric.combined_score(&metrics);
        Ok(SiteMetricsView {
            site,
            pollutant: pollutant.to_string(),
            metrics,
            combined_score: combined.score,
            normalized_scores: combined.normalized,
        })
    }

    /// One row per (site, target) for every site whose metrics file exists.
    pub fn all_metrics(&self) -> Result<Vec<MetricsRow>, CatalogError> {
        let mut rows = Vec::new();
        for &site in &self.sites {
            let document = match self.metrics_document(site) {
                Ok(document) => document,
                Err(CatalogError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            for (pollutant, metrics) in document {
                let combined = self.rubric.combined_score(&metrics);
                rows.push(MetricsRow {
                    site,
                    pollutant,
                    metrics,
                    combined_score: combined.score,
                    normalized_scores: combined.normalized,
                });
            }
        }
        Ok(rows)
    }

    fn ensure_known(&self, site: SiteId) -> Result<(), CatalogError> {
        if self.sites.contains(&site) {
            Ok(())
        } else {
            Err(CatalogError::UnknownSite(site))
        }
    }

    fn metrics_document(&self, site: SiteId) -> Result<SiteMetrics, CatalogError> {
        self.ensure_known(site)?;
        let path = self.layout.metrics_path(site);
        if !path.is_file() {
            return Err(CatalogError::NotFound {
                site,
                kind: "metrics",
                path,
            });
        }
        Ok(self.layout.read_metrics(site)?)
    }

    fn forecast_frame(
        &self,
        site: SiteId,
        horizon: usize,
    ) -> Result<(SiteFrame, Vec<String>), CatalogError> {
        self.ensure_known(site)?;
        let path = self.layout.prediction_path(site);
        if !path.is_file() {
            return Err(CatalogError::NotFound {
                site,
                kind: "prediction",
                path,
            });
        }
        let mut frame = self.layout.read_predictions(site)?;
        frame.index_by_time(&self.time_columns);
        let rows: Vec<usize> = (0..frame.len().min(horizon)).collect();
        let frame = frame.select_rows(&rows);
        let stamps = frame
            .timestamps(&self.time_columns)
            .map(|stamps| {
                stamps
                    .into_iter()
                    .map(|stamp| {
                        stamp
                            .map(|stamp| stamp.format(TIMESTAMP_FORMAT).to_string())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_else(|| vec![String::new(); frame.len()]);
        Ok((frame, stamps))
    }
}

fn served_name(name: &str) -> String {
    SERVED_NAMES
        .iter()
        .find(|(stored, _)| *stored == name)
        .map_or_else(|| name.to_string(), |(_, served)| (*served).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn catalog(root: &std::path::Path) -> ArtifactCatalog {
        let layout = ArtifactLayout::new(root);
        let predictions = SiteFrame::from_columns([
            ("year", vec![2024.0, 2024.0, 2024.0]),
            ("month", vec![3.0, 3.0, 3.0]),
            ("day", vec![2.0, 1.0, 1.0]),
            ("hour", vec![0.0, 23.0, 22.0]),
            ("T_forecast", vec![281.0, 280.0, 279.0]),
            ("O3_target", vec![f64::NAN, 40.0, 38.0]),
            ("O3_predicted", vec![42.5, 39.0, 37.5]),
            ("NO2_predicted", vec![12.0, 11.0, 10.0]),
        ])
        .unwrap();
        let mut metrics = SiteMetrics::new();
        metrics.insert(
            "O3_target".into(),
            MetricsRecord {
                rmse: 15.0,
                r2: 0.8,
                ria: 0.9,
                mae: 8.0,
                bias: -3.0,
            },
        );
        metrics.insert(
            "NO2_target".into(),
            MetricsRecord {
                rmse: 5.0,
                ..MetricsRecord::undefined()
            },
        );
        layout.persist(1, &predictions, &metrics).unwrap();
        layout.persist(3, &predictions, &metrics).unwrap();
        ArtifactCatalog::new(layout, (1..=7).collect())
    }

    #[test]
    fn forecast_rows_are_sorted_renamed_and_truncated() {
        let dir = tempdir().unwrap();
        let forecast = catalog(dir.path()).site_forecast(1, 2).unwrap();
        assert_eq!(forecast.data.len(), 2);
        assert_eq!(forecast.data[0].timestamp, "2024-03-01 22:00:00");
        assert_eq!(forecast.data[1].timestamp, "2024-03-01 23:00:00");
        let first = &forecast.data[0].values;
        assert_eq!(first["O3_pred"], Some(37.5));
        assert_eq!(first["O3_true"], Some(38.0));
        assert!(first.contains_key("NO2_pred"));
        assert!(!first.contains_key("O3_predicted"));

        let all = catalog(dir.path()).site_forecast(1, DEFAULT_HORIZON).unwrap();
        assert_eq!(all.data.len(), 3);
        assert_eq!(all.data[2].values["O3_true"], None);
        let json = serde_json::to_value(&all).unwrap();
        assert!(json["data"][2]["O3_true"].is_null());
        assert_eq!(json["data"][2]["timestamp"], "2024-03-02 00:00:00");
    }

    #[test]
    fn unknown_and_missing_sites_are_distinguished() {
        let dir = tempdir().unwrap();
        let catalog = catalog(dir.path());
        assert!(matches!(
            catalog.site_forecast(9, 24),
            Err(CatalogError::UnknownSite(9))
        ));
        assert!(matches!(
            catalog.site_forecast(2, 24),
            Err(CatalogError::NotFound { site: 2, .. })
        ));
    }

    #[test]
    fn csv_download_keeps_stored_names() {
        let dir = tempdir().unwrap();
        let csv = catalog(dir.path()).forecast_csv(1, 2).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("year,month,day,hour,T_forecast,O3_target,O3_predicted,NO2_predicted,timestamp")
        );
        assert_eq!(
            lines.next(),
            Some("2024,3,1,22,279,38,37.5,10,2024-03-01 22:00:00")
        );
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn site_metrics_applies_the_rubric() {
        let dir = tempdir().unwrap();
        let view = catalog(dir.path()).site_metrics(1, "O3").unwrap();
        assert_eq!(view.pollutant, "O3");
        // RMSE 0.5, MAE 1.0, Bias 0.5, R2 1.0, RIA 1.0
        assert!((view.combined_score - 0.8).abs() < 1e-12);
        assert!((view.normalized_scores[&Metric::Bias] - 0.5).abs() < 1e-12);

        let lenient = catalog(dir.path())
            .with_rubric(Rubric::lenient())
            .site_metrics(1, "O3")
            .unwrap();
        assert!(lenient.combined_score > view.combined_score);

        assert!(matches!(
            catalog(dir.path()).site_metrics(1, "PM25"),
            Err(CatalogError::MetricsMissing { .. })
        ));
    }

    #[test]
    fn all_metrics_skips_sites_without_files() {
        let dir = tempdir().unwrap();
        let rows = catalog(dir.path()).all_metrics().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows.iter().map(|row| row.site).collect::<Vec<_>>(),
            vec![1, 1, 3, 3]
        );
        let json = serde_json::to_value(&rows[1]).unwrap();
        assert_eq!(json["pollutant"], "NO2_target");
        assert_eq!(json["RMSE"], 5.0);
        assert!(json["R2"].is_null());
        assert_eq!(json["normalized_scores"]["RMSE"], 1.0);
    }
}
