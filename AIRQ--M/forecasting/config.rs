use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;

use crate::{
    artifacts::ArtifactLayout,
    booster::{BoosterParams, GradientBooster},
    error::SiteId,
    metrics::rubric::Rubric,
    preprocess::{
        source::CsvSiteSource, synthesis::FutureSynthesis, ColumnLayout, PreprocessStrategy,
        Preprocessor,
    },
    trainer::{ModelTrainer, SplitConfig},
};

/// Complete forecasting configuration, usually read from `airq.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Input, output and log locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Sites processed by a batch run.
    #[serde(default = "default_sites")]
    pub sites: Vec<SiteId>,
    /// Log filtering.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Column names.
    #[serde(default)]
    pub columns: ColumnLayout,
    /// Preprocessing strategy.
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    /// Train/validation/test split.
    #[serde(default)]
    pub split: SplitConfig,
    /// Booster hyperparameters.
    #[serde(default)]
    pub booster: BoosterParams,
    /// Metric thresholds for combined scores.
    #[serde(default)]
    pub rubric: Rubric,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            sites: default_sites(),
            logging: LoggingConfig::default(),
            columns: ColumnLayout::default(),
            preprocess: PreprocessConfig::default(),
            split: SplitConfig::default(),
            booster: BoosterParams::default(),
            rubric: Rubric::default(),
        }
    }
}

/// Filesystem locations. Relative paths resolve against the config file's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `site_{n}_*.csv` inputs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Root of the `predictions/` and `metrics/` directories.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// JSON-lines log file.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// JSON-lines event file.
    #[serde(default = "default_event_log")]
    pub event_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            log_path: default_log_path(),
            event_log: default_event_log(),
        }
    }
}

impl PathsConfig {
    fn resolve_against(&mut self, base: &Path) {
        for path in [
            &mut self.data_dir,
            &mut self.output_dir,
            &mut self.log_path,
            &mut self.event_log,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Records below this level are dropped.
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Train on the training table, predict the unseen table.
    #[default]
    SplitSources,
    /// Train on combined history, predict a synthesized horizon.
    CombinedHistory,
}

/// `[preprocess]` section: strategy plus future-synthesis settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Which strategy to run.
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Horizon, start and jitter for the combined-history strategy.
    #[serde(flatten)]
    pub future: FutureSynthesis,
}

impl PreprocessConfig {
    /// Strategy value handed to the preprocessor.
    #[must_use]
    pub fn strategy(&self) -> PreprocessStrategy {
        match self.strategy {
            StrategyKind::SplitSources => PreprocessStrategy::SplitSources,
            StrategyKind::CombinedHistory => PreprocessStrategy::CombinedHistory(self.future.clone()),
        }
    }
}

fn default_sites() -> Vec<SiteId> {
    (1..=7).collect()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs/forecast.log")
}

fn default_event_log() -> PathBuf {
    PathBuf::from("logs/events.jsonl")
}

const fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl ForecastConfig {
    /// Loads configuration from a TOML file, resolving relative paths against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading forecast config {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml_str(&raw, &base).with_context(|| format!("loading {}", path.display()))
    }

    /// Loads `path` when given, otherwise the defaults rooted at the working directory.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.normalize(Path::new("."))?;
                Ok(config)
            }
        }
    }

    /// Parses a TOML document with relative paths resolved against `base`.
    pub fn from_toml_str(raw: &str, base: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(raw).context("parsing forecast config")?;
        config.normalize(base)?;
        Ok(config)
    }

    fn normalize(&mut self, base: &Path) -> Result<()> {
        self.paths.resolve_against(base);
        if self.sites.is_empty() {
            self.sites = default_sites();
        }
        let unique: BTreeSet<SiteId> = self.sites.iter().copied().collect();
        if unique.len() != self.sites.len() {
            bail!("sites contains duplicates: {:?}", self.sites);
        }
        if self.columns.time.len() != 4 {
            bail!(
                "columns.time must name year, month, day and hour columns, got {:?}",
                self.columns.time
            );
        }
        if self.columns.features.is_empty() || self.columns.targets.is_empty() {
            bail!("columns.features and columns.targets must not be empty");
        }
        let future = &self.preprocess.future;
        if future.horizon_hours == 0 {
            bail!("preprocess.horizon_hours must be at least 1");
        }
        if !(0.0..1.0).contains(&future.jitter) {
            bail!("preprocess.jitter {} must be in [0, 1)", future.jitter);
        }
        self.split.validate()?;
        self.booster.validate()?;
        self.rubric.validate()?;
        Ok(())
    }

    /// Input source reading from `paths.data_dir`.
    #[must_use]
    pub fn site_source(&self) -> CsvSiteSource {
        CsvSiteSource::new(&self.paths.data_dir)
    }

    /// Output layout under `paths.output_dir`.
    #[must_use]
    pub fn artifact_layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.paths.output_dir)
    }

    /// Preprocessor for the configured columns and strategy.
    #[must_use]
    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new(self.columns.clone(), self.preprocess.strategy())
    }

    /// Trainer for the configured booster and split.
    #[must_use]
    pub fn trainer(&self) -> ModelTrainer {
        ModelTrainer::new(
            GradientBooster::new(self.booster.clone()),
            self.split.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{rubric::Threshold, Metric};
    use tempfile::tempdir;

    #[test]
    fn empty_document_is_the_default_configuration() {
        let config = ForecastConfig::from_toml_str("", Path::new("/srv/airq")).unwrap();
        assert_eq!(config.sites, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/airq/data"));
        assert_eq!(config.booster, BoosterParams::default());
        assert_eq!(config.preprocess.strategy, StrategyKind::SplitSources);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.columns.targets, vec!["O3_target", "NO2_target"]);
    }

    #[test]
    fn loads_sections_and_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("airq.toml");
        fs::write(
            &path,
            r#"
sites = [2, 5]

[paths]
data_dir = "inputs"
output_dir = "/var/airq"

[logging]
level = "WARN"

[preprocess]
strategy = "combined_history"
horizon_hours = 24
forecast_start = "2025-10-12T00:00:00"
seed = 7

[split]
test_fraction = 0.25
shuffle = true

[booster]
n_rounds = 500
learning_rate = 0.05
early_stopping_rounds = 20

[rubric]
RMSE = { good = 12.0, bad = 20.0 }
R2 = { good = 0.8, bad = 0.5, higher_is_better = true }
"#,
        )
        .unwrap();
        let config = ForecastConfig::load(&path).unwrap();
        assert_eq!(config.sites, vec![2, 5]);
        assert_eq!(config.paths.data_dir, dir.path().join("inputs"));
        assert_eq!(config.paths.output_dir, PathBuf::from("/var/airq"));
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.booster.n_rounds, 500);
        assert_eq!(config.booster.max_depth, 7);
        assert_eq!(config.booster.early_stopping_rounds, Some(20));
        assert!(config.split.shuffle);
        match config.preprocess.strategy() {
            PreprocessStrategy::CombinedHistory(future) => {
                assert_eq!(future.horizon_hours, 24);
                assert_eq!(future.seed, 7);
                assert!(future.forecast_start.is_some());
                assert!((future.jitter - 0.02).abs() < f64::EPSILON);
            }
            PreprocessStrategy::SplitSources => panic!("expected combined history"),
        }
        assert_eq!(
            config.rubric.threshold(Metric::Rmse),
            Some(&Threshold::lower(12.0, 20.0))
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        let base = Path::new(".");
        assert!(ForecastConfig::from_toml_str("[split]\ntest_fraction = 1.5\n", base).is_err());
        assert!(ForecastConfig::from_toml_str("[booster]\nsubsample = 0.0\n", base).is_err());
        assert!(ForecastConfig::from_toml_str("sites = [1, 1]\n", base).is_err());
        assert!(ForecastConfig::from_toml_str("[preprocess]\njitter = 2.0\n", base).is_err());
        assert!(ForecastConfig::from_toml_str(
            "[rubric]\nRIA = { good = 0.2, bad = 0.9, higher_is_better = true }\n",
            base
        )
        .is_err());
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = ForecastConfig::load("/definitely/not/here/airq.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here/airq.toml"));
    }
}
