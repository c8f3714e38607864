use std::{fmt, path::PathBuf, time::Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    artifacts::{ArtifactLayout, PersistedArtifacts, SiteMetrics},
    config::ForecastConfig,
    error::{ForecastResult, SiteId},
    metrics::rubric::Rubric,
    predictor::{evaluate_if_possible, predict},
    preprocess::{source::SiteSource, Preprocessor},
    telemetry::ForecastTelemetry,
    trainer::ModelTrainer,
};

/// Stages of a site run. Transitions are strictly sequential; the last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteState {
    /// Reading the site's input tables.
    Load,
    /// Imputation, feature/target split and standardization.
    Preprocess,
    /// Fitting one model per target.
    Train,
    /// Scoring the held-out test split.
    Evaluate,
    /// Predicting the inference rows.
    Predict,
    /// Writing prediction and metrics files.
    Persist,
    /// Both files written.
    Done,
    /// Input data missing.
    Skipped,
    /// Any other error.
    Failed,
}

impl SiteState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Preprocess => "preprocess",
            Self::Train => "train",
            Self::Evaluate => "evaluate",
            Self::Predict => "predict",
            Self::Persist => "persist",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one site run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SiteStatus {
    /// Both artifacts were written.
    Done {
        /// Prediction table.
        prediction_path: PathBuf,
        /// Metrics document.
        metrics_path: PathBuf,
    },
    /// A required input file was missing.
    Skipped {
        /// Why the site was skipped.
        reason: String,
    },
    /// A stage raised an error; no artifacts were written.
    Failed {
        /// Stage that failed.
        stage: SiteState,
        /// Error message.
        error: String,
    },
}

impl SiteStatus {
    /// Terminal state corresponding to this status.
    #[must_use]
    pub const fn state(&self) -> SiteState {
        match self {
            Self::Done { .. } => SiteState::Done,
            Self::Skipped { .. } => SiteState::Skipped,
            Self::Failed { .. } => SiteState::Failed,
        }
    }
}

/// Outcome record for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteOutcome {
    /// Site identifier.
    pub site: SiteId,
    /// Terminal status.
    #[serde(flatten)]
    pub status: SiteStatus,
    /// Wall time spent on the site.
    pub elapsed_ms: u64,
}

/// Per-site outcomes of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Run identifier.
    pub run_id: Uuid,
    /// Batch start time.
    pub started_at: DateTime<Utc>,
    /// Total wall time.
    pub elapsed_ms: u64,
    /// Sites with both artifacts written.
    pub completed: usize,
    /// Sites skipped for missing data.
    pub skipped: usize,
    /// Sites that failed.
    pub failed: usize,
    /// Outcomes in processing order.
    pub outcomes: Vec<SiteOutcome>,
}

impl BatchSummary {
    /// Outcome for one site.
    #[must_use]
    pub fn outcome(&self, site: SiteId) -> Option<&SiteOutcome> {
        self.outcomes.iter().find(|outcome| outcome.site == site)
    }

    /// Whether every site completed.
    #[must_use]
    pub const fn all_completed(&self) -> bool {
        self.skipped == 0 && self.failed == 0
    }
}

/// Per-site forecasting state machine run sequentially over a batch of sites.
pub struct ForecastPipeline {
    source: Box<dyn SiteSource>,
    preprocessor: Preprocessor,
    trainer: ModelTrainer,
    rubric: Rubric,
    layout: ArtifactLayout,
    telemetry: ForecastTelemetry,
}

impl fmt::Debug for ForecastPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForecastPipeline")
            .field("preprocessor", &self.preprocessor)
            .field("trainer", &self.trainer)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl ForecastPipeline {
    /// Assembles a pipeline from its parts.
    #[must_use]
    pub fn new(
        source: Box<dyn SiteSource>,
        preprocessor: Preprocessor,
        trainer: ModelTrainer,
        layout: ArtifactLayout,
        telemetry: ForecastTelemetry,
    ) -> Self {
        Self {
            source,
            preprocessor,
            trainer,
            rubric: Rubric::default(),
            layout,
            telemetry,
        }
    }

    /// Pipeline reading CSV inputs and writing artifacts where `config` points.
    #[must_use]
    pub fn from_config(config: &ForecastConfig, telemetry: ForecastTelemetry) -> Self {
        Self::new(
            Box::new(config.site_source()),
            config.preprocessor(),
            config.trainer(),
            config.artifact_layout(),
            telemetry,
        )
        .with_rubric(config.rubric.clone())
    }

    /// Rubric used for the combined scores that are logged after evaluation.
    #[must_use]
    pub fn with_rubric(mut self, rubric: Rubric) -> Self {
        self.rubric = rubric;
        self
    }

    /// Output layout.
    #[must_use]
    pub const fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Runs every site in order. A site's failure never stops the batch.
    pub fn run_batch(&self, sites: &[SiteId]) -> BatchSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        self.telemetry.note(
            LogLevel::Info,
            "batch.start",
            json!({ "run_id": run_id, "sites": sites }),
        );
        let outcomes: Vec<SiteOutcome> = sites.iter().map(|site| self.run_site(*site)).collect();
        let count = |state: SiteState| {
            outcomes
                .iter()
                .filter(|outcome| outcome.status.state() == state)
                .count()
        };
        let summary = BatchSummary {
            run_id,
            started_at,
            elapsed_ms: elapsed_ms(clock),
            completed: count(SiteState::Done),
            skipped: count(SiteState::Skipped),
            failed: count(SiteState::Failed),
            outcomes,
        };
        let counts = json!({
            "run_id": summary.run_id,
            "completed": summary.completed,
            "skipped": summary.skipped,
            "failed": summary.failed,
            "elapsed_ms": summary.elapsed_ms,
        });
        self.telemetry
            .note(LogLevel::Info, "batch.completed", counts.clone());
        self.telemetry.announce("forecast.batch.completed", counts);
        summary
    }

    /// Runs one site to a terminal state.
    pub fn run_site(&self, site: SiteId) -> SiteOutcome {
        let clock = Instant::now();
        let mut state = SiteState::Load;
        let status = match self.execute(site, &mut state) {
            Ok(written) => SiteStatus::Done {
                prediction_path: written.prediction_path,
                metrics_path: written.metrics_path,
            },
            Err(err) if state == SiteState::Load && err.is_missing_data() => SiteStatus::Skipped {
                reason: err.to_string(),
            },
            Err(err) => SiteStatus::Failed {
                stage: state,
                error: err.to_string(),
            },
        };
        let outcome = SiteOutcome {
            site,
            status,
            elapsed_ms: elapsed_ms(clock),
        };
        self.report(&outcome);
        outcome
    }

    fn enter(&self, site: SiteId, state: &mut SiteState, next: SiteState) {
        *state = next;
        self.telemetry.note(
            LogLevel::Debug,
            "site.state",
            json!({ "site": site, "state": next }),
        );
    }

    fn execute(&self, site: SiteId, state: &mut SiteState) -> ForecastResult<PersistedArtifacts> {
        self.enter(site, state, SiteState::Load);
        let data = self.source.load(site)?;
        self.telemetry.note(
            LogLevel::Debug,
            "site.loaded",
            json!({ "site": site, "train_rows": data.train.len(), "unseen_rows": data.unseen.len() }),
        );

        self.enter(site, state, SiteState::Preprocess);
        let prepared = self.preprocessor.prepare(data)?;

        self.enter(site, state, SiteState::Train);
        let training = self
            .trainer
            .train(&prepared.train_x, &prepared.train_y)?;
        for report in &training.reports {
            if let Some(reason) = &report.fallback {
                self.telemetry.note(
                    LogLevel::Warn,
                    "training.fallback",
                    json!({
                        "site": site,
                        "target": report.target,
                        "reason": reason,
                        "rounds_trained": report.rounds_trained,
                    }),
                );
            }
            let top: Vec<(&String, &f64)> = report.importance.iter().take(5).collect();
            self.telemetry.note(
                LogLevel::Info,
                "training.summary",
                json!({
                    "site": site,
                    "target": report.target,
                    "rows": training.rows,
                    "best_rounds": report.best_rounds,
                    "rounds_trained": report.rounds_trained,
                    "top_features": top,
                }),
            );
        }

        self.enter(site, state, SiteState::Evaluate);
        let metrics: SiteMetrics = training
            .reports
            .iter()
            .map(|report| (report.target.clone(), report.test_metrics))
            .collect();
        for (target, record) in &metrics {
            let combined = self.rubric.combined_score(record);
            self.telemetry.note(
                LogLevel::Info,
                "evaluation.test",
                json!({
                    "site": site,
                    "target": target,
                    "metrics": record,
                    "combined_score": combined.score,
                }),
            );
        }

        self.enter(site, state, SiteState::Predict);
        let predictions = predict(&training.models, &prepared.inference_x)?;
        let mut table = prepared.inference_frame;
        predictions.attach_to(&mut table)?;
        let observed = evaluate_if_possible(&predictions, &table);
        if !observed.is_empty() {
            self.telemetry.note(
                LogLevel::Info,
                "evaluation.inference",
                json!({ "site": site, "metrics": observed }),
            );
        }

        self.enter(site, state, SiteState::Persist);
        let written = self.layout.persist(site, &table, &metrics)?;
        *state = SiteState::Done;
        Ok(written)
    }

    fn report(&self, outcome: &SiteOutcome) {
        let payload = serde_json::to_value(outcome).unwrap_or_else(|_| json!({ "site": outcome.site }));
        let (level, message, event) = match &outcome.status {
            SiteStatus::Done { .. } => (LogLevel::Info, "site.done", "forecast.site.completed"),
            SiteStatus::Skipped { .. } => (LogLevel::Warn, "site.skipped", "forecast.site.skipped"),
            SiteStatus::Failed { .. } => (LogLevel::Error, "site.failed", "forecast.site.failed"),
        };
        self.telemetry.note(level, message, payload.clone());
        self.telemetry.announce(event, payload);
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        booster::{BoosterParams, GradientBooster},
        error::ForecastError,
        frame::SiteFrame,
        preprocess::{
            source::{CsvSiteSource, SiteData},
            synthesis::FutureSynthesis,
            ColumnLayout, PreprocessStrategy,
        },
        trainer::SplitConfig,
    };
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use shared_event_bus::MemoryEventBus;
    use std::{fs, path::Path, sync::Arc};
    use tempfile::tempdir;

    fn site_table(site: SiteId, start_day: u32, hours: usize, with_targets: bool) -> SiteFrame {
        let mut rng = ChaCha8Rng::seed_from_u64(u64::from(site));
        let mut columns: Vec<(&str, Vec<f64>)> = vec![
            ("year", vec![]),
            ("month", vec![]),
            ("day", vec![]),
            ("hour", vec![]),
            ("O3_forecast", vec![]),
            ("NO2_forecast", vec![]),
            ("T_forecast", vec![]),
            ("NO2_satellite", vec![]),
        ];
        let mut o3 = Vec::new();
        let mut no2 = Vec::new();
        for idx in 0..hours {
            let day = f64::from(start_day) + (idx / 24) as f64;
            let hour = (idx % 24) as f64;
            let o3_fc = 30.0 + 10.0 * (hour / 24.0 * std::f64::consts::TAU).sin() + rng.gen_range(-2.0..2.0);
            let no2_fc = 20.0 + rng.gen_range(0.0..8.0);
            let temp = 285.0 + rng.gen_range(-3.0..3.0);
            let sat = if idx % 5 == 0 { f64::NAN } else { rng.gen_range(0.5..2.0) };
            for (column, value) in columns.iter_mut().zip([2024.0, 3.0, day, hour, o3_fc, no2_fc, temp, sat]) {
                column.1.push(value);
            }
            o3.push(0.9 * o3_fc + 0.2 * (temp - 285.0));
            no2.push(1.1 * no2_fc - 2.0);
        }
        if with_targets {
            columns.push(("O3_target", o3));
            columns.push(("NO2_target", no2));
        }
        SiteFrame::from_columns(columns).unwrap()
    }

    fn write_site(dir: &Path, site: SiteId) {
        let train = site_table(site, 1, 96, true);
        let unseen = site_table(site, 5, 24, false);
        train
            .write_csv(fs::File::create(dir.join(format!("site_{site}_train_data.csv"))).unwrap())
            .unwrap();
        unseen
            .write_csv(
                fs::File::create(dir.join(format!("site_{site}_unseen_input_data.csv"))).unwrap(),
            )
            .unwrap();
    }

    fn quick_trainer() -> ModelTrainer {
        ModelTrainer::new(
            GradientBooster::new(BoosterParams {
                n_rounds: 40,
                learning_rate: 0.2,
                max_depth: 4,
                early_stopping_rounds: Some(10),
                ..BoosterParams::default()
            }),
            SplitConfig::default(),
        )
    }

    fn pipeline(
        source: Box<dyn SiteSource>,
        strategy: PreprocessStrategy,
        out: &Path,
        telemetry: ForecastTelemetry,
    ) -> ForecastPipeline {
        ForecastPipeline::new(
            source,
            Preprocessor::new(ColumnLayout::default(), strategy),
            quick_trainer(),
            ArtifactLayout::new(out),
            telemetry,
        )
    }

    #[test]
    fn batch_skips_the_site_without_input_and_completes_the_rest() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        for site in [1, 2, 3, 5, 6, 7] {
            write_site(data.path(), site);
        }
        let bus = Arc::new(MemoryEventBus::new(64));
        let telemetry = ForecastTelemetry::builder("forecasting.pipeline")
            .log_path(out.path().join("forecast.log"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let pipeline = pipeline(
            Box::new(CsvSiteSource::new(data.path())),
            PreprocessStrategy::SplitSources,
            out.path(),
            telemetry,
        );
        let summary = pipeline.run_batch(&[1, 2, 3, 4, 5, 6, 7]);

        assert_eq!(summary.completed, 6);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert!(matches!(
            summary.outcome(4).unwrap().status,
            SiteStatus::Skipped { .. }
        ));
        let layout = pipeline.layout();
        for site in [1, 2, 3, 5, 6, 7] {
            assert!(layout.prediction_path(site).is_file(), "site {site}");
            assert!(layout.metrics_path(site).is_file(), "site {site}");
        }
        assert!(!layout.prediction_path(4).exists());
        assert!(!layout.metrics_path(4).exists());

        let predictions = layout.read_predictions(1).unwrap();
        assert_eq!(predictions.len(), 24);
        assert!(predictions.column("O3_predicted").unwrap().iter().all(|v| v.is_finite()));
        assert!(predictions.has_column("NO2_predicted"));
        let metrics = layout.read_metrics(1).unwrap();
        assert_eq!(
            metrics.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["O3_target", "NO2_target"]
        );

        assert_eq!(bus.of_type("forecast.site.completed").len(), 6);
        assert_eq!(bus.of_type("forecast.site.skipped").len(), 1);
        assert_eq!(bus.of_type("forecast.batch.completed").len(), 1);
        let log = fs::read_to_string(out.path().join("forecast.log")).unwrap();
        assert!(log.contains("site.skipped"));
        assert!(log.contains("\"state\":\"persist\""));
    }

    struct InMemorySource(Vec<SiteData>);

    impl SiteSource for InMemorySource {
        fn load(&self, site: SiteId) -> ForecastResult<SiteData> {
            self.0
                .iter()
                .find(|data| data.site == site)
                .cloned()
                .ok_or_else(|| ForecastError::DataNotFound {
                    site,
                    path: PathBuf::from(format!("memory://{site}")),
                })
        }
    }

    #[test]
    fn a_failing_site_leaves_no_artifacts_and_does_not_stop_the_batch() {
        let out = tempdir().unwrap();
        let mut broken = site_table(2, 1, 96, true);
        broken.remove_column("NO2_target");
        let source = InMemorySource(vec![
            SiteData {
                site: 1,
                train: site_table(1, 1, 96, true),
                unseen: site_table(1, 5, 24, false),
            },
            SiteData {
                site: 2,
                train: broken,
                unseen: site_table(2, 5, 24, false),
            },
        ]);
        let pipeline = pipeline(
            Box::new(source),
            PreprocessStrategy::SplitSources,
            out.path(),
            ForecastTelemetry::disabled("forecasting.pipeline"),
        );
        let summary = pipeline.run_batch(&[2, 1]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        match &summary.outcome(2).unwrap().status {
            SiteStatus::Failed { stage, error } => {
                assert_eq!(*stage, SiteState::Preprocess);
                assert!(error.contains("target"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert!(!pipeline.layout().prediction_path(2).exists());
        assert!(!pipeline.layout().metrics_path(2).exists());
        assert!(pipeline.layout().metrics_path(1).is_file());
    }

    #[test]
    fn combined_history_forecasts_the_synthesized_horizon() {
        let out = tempdir().unwrap();
        let source = InMemorySource(vec![SiteData {
            site: 3,
            train: site_table(3, 1, 96, true),
            unseen: site_table(3, 5, 24, true),
        }]);
        let strategy = PreprocessStrategy::CombinedHistory(FutureSynthesis {
            horizon_hours: 12,
            ..FutureSynthesis::default()
        });
        let pipeline = pipeline(
            Box::new(source),
            strategy,
            out.path(),
            ForecastTelemetry::disabled("forecasting.pipeline"),
        );
        let outcome = pipeline.run_site(3);
        assert!(matches!(outcome.status, SiteStatus::Done { .. }), "{outcome:?}");
        let table = pipeline.layout().read_predictions(3).unwrap();
        assert_eq!(table.len(), 12);
        assert!(!table.has_column("O3_target"));
        // History ends on day 5 at 23:00, so the horizon starts on day 6 at midnight.
        assert_eq!(table.column("day").unwrap()[0], 6.0);
        assert_eq!(table.column("hour").unwrap()[0], 0.0);
    }

    #[test]
    fn outcome_serializes_with_a_status_tag() {
        let outcome = SiteOutcome {
            site: 4,
            status: SiteStatus::Failed {
                stage: SiteState::Train,
                error: "boom".into(),
            },
            elapsed_ms: 3,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["stage"], "train");
        assert_eq!(value["site"], 4);
        assert!(SiteState::Failed.is_terminal());
        assert!(!SiteState::Predict.is_terminal());
    }
}
