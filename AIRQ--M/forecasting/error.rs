use std::path::PathBuf;

use thiserror::Error;

/// Site identifier (`site_{n}` in file names).
pub type SiteId = u32;

/// Errors raised by the forecasting core.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A required input file for the site does not exist.
    #[error("site {site}: input file {path:?} not found")]
    DataNotFound {
        /// Site whose input is missing.
        site: SiteId,
        /// Path that was probed.
        path: PathBuf,
    },
    /// Model fitting could not proceed.
    #[error("training {target}: {reason}")]
    Training {
        /// Target column being fitted.
        target: String,
        /// Human readable cause.
        reason: String,
    },
    /// Column layout mismatch (missing columns, scaler/matrix disagreement).
    #[error("schema error: {0}")]
    Schema(String),
    /// No rows left to work with.
    #[error("empty dataset: {0}")]
    EmptyDataset(String),
    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
    /// CSV decoding or encoding failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ForecastError {
    /// Whether the error means the site has no input data (skip rather than fail).
    #[must_use]
    pub const fn is_missing_data(&self) -> bool {
        matches!(self, Self::DataNotFound { .. })
    }
}

/// Result alias for the forecasting core.
pub type ForecastResult<T> = Result<T, ForecastError>;
