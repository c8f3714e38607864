#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Per-site O3/NO2 forecasting: preprocessing, gradient boosting, evaluation and batch runs.

/// Error taxonomy and site identifiers.
#[path = "../error.rs"]
pub mod error;

/// Column-oriented site tables.
#[path = "../frame.rs"]
pub mod frame;

/// Imputation, feature/target split and standardization.
#[path = "../preprocess/main.rs"]
pub mod preprocess;

/// Regression metrics and the combined score rubric.
#[path = "../metrics/main.rs"]
pub mod metrics;

/// Histogram gradient-boosted trees.
#[path = "../booster/main.rs"]
pub mod booster;

/// Per-target training with early stopping and test metrics.
#[path = "../trainer.rs"]
pub mod trainer;

/// Inference and optional evaluation against known targets.
#[path = "../predictor.rs"]
pub mod predictor;

/// Atomic prediction/metrics persistence.
#[path = "../artifacts.rs"]
pub mod artifacts;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Per-site state machine and batch orchestration.
#[path = "../pipeline.rs"]
pub mod pipeline;

pub use artifacts::{ArtifactLayout, PersistedArtifacts, SiteMetrics};
pub use booster::{BoosterParams, GradientBooster, TrainedModel};
pub use config::{ForecastConfig, PathsConfig, StrategyKind};
pub use error::{ForecastError, ForecastResult, SiteId};
pub use frame::SiteFrame;
pub use metrics::{
    rubric::{combined_score, normalize_metric, CombinedScore, Rubric, Threshold},
    Metric, MetricsRecord,
};
pub use pipeline::{BatchSummary, ForecastPipeline, SiteOutcome, SiteState, SiteStatus};
pub use predictor::{evaluate_if_possible, predict, Predictions};
pub use preprocess::{
    scaler::Standardizer,
    source::{CsvSiteSource, SiteData, SiteSource},
    synthesis::FutureSynthesis,
    ColumnLayout, PreprocessStrategy, Preprocessor,
};
pub use telemetry::{ForecastTelemetry, ForecastTelemetryBuilder};
pub use trainer::{ModelTrainer, SplitConfig, TrainedModelSet};
