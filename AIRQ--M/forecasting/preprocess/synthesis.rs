use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::ColumnLayout;
use crate::{
    error::{ForecastError, ForecastResult},
    frame::SiteFrame,
};

/// Settings for building future covariate rows from the last known record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureSynthesis {
    /// Number of hourly rows to generate.
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: usize,
    /// First forecast hour; defaults to the hour after the last history row.
    #[serde(default)]
    pub forecast_start: Option<NaiveDateTime>,
    /// Relative jitter applied independently to every covariate of every hour.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Seed for the jitter generator.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for FutureSynthesis {
    fn default() -> Self {
        Self {
            horizon_hours: default_horizon_hours(),
            forecast_start: None,
            jitter: default_jitter(),
            seed: default_seed(),
        }
    }
}

const fn default_horizon_hours() -> usize {
    48
}

const fn default_jitter() -> f64 {
    0.02
}

const fn default_seed() -> u64 {
    42
}

/// Builds `horizon_hours` rows from the last row of a time-sorted history.
///
/// Time columns advance hour by hour; each covariate is the template value scaled by a factor
/// drawn uniformly from `1 ± jitter`. Target columns are not carried over.
pub fn synthesize_future(
    history: &SiteFrame,
    layout: &ColumnLayout,
    settings: &FutureSynthesis,
) -> ForecastResult<SiteFrame> {
    let stamps = history.timestamps(&layout.time).ok_or_else(|| {
        ForecastError::Schema("future synthesis needs year/month/day/hour columns".into())
    })?;
    let last = history.len().checked_sub(1).ok_or_else(|| {
        ForecastError::EmptyDataset("no history row to synthesize from".into())
    })?;
    let last_stamp = stamps[last].ok_or_else(|| {
        ForecastError::Schema("last history row has no resolvable timestamp".into())
    })?;
    let start = settings
        .forecast_start
        .unwrap_or(last_stamp + Duration::hours(1));

    let mut columns: IndexMap<String, Vec<f64>> = history
        .column_names()
        .filter(|name| !layout.targets.iter().any(|target| target == name))
        .map(|name| (name.to_string(), Vec::with_capacity(settings.horizon_hours)))
        .collect();
    let covariates: Vec<&str> = layout
        .covariates()
        .filter(|name| columns.contains_key(*name))
        .collect();
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);

    for hour in 0..settings.horizon_hours {
        let stamp = start + Duration::hours(i64::try_from(hour).unwrap_or(i64::MAX));
        for (name, values) in &mut columns {
            let template = history.column(name).map_or(f64::NAN, |column| column[last]);
            values.push(time_part(layout, name, stamp).unwrap_or(template));
        }
        for name in &covariates {
            let factor = if settings.jitter > 0.0 {
                1.0 + rng.gen_range(-settings.jitter..=settings.jitter)
            } else {
                1.0
            };
            if let Some(value) = columns.get_mut(*name).and_then(|values| values.last_mut()) {
                *value *= factor;
            }
        }
    }
    SiteFrame::from_columns(columns)
}

fn time_part(layout: &ColumnLayout, column: &str, stamp: NaiveDateTime) -> Option<f64> {
    let idx = layout.time.iter().position(|name| name == column)?;
    let value = match idx {
        0 => stamp.year(),
        #[allow(clippy::cast_possible_wrap)]
        1 => stamp.month() as i32,
        #[allow(clippy::cast_possible_wrap)]
        2 => stamp.day() as i32,
        #[allow(clippy::cast_possible_wrap)]
        3 => stamp.hour() as i32,
        _ => return None,
    };
    Some(f64::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn history() -> SiteFrame {
        SiteFrame::from_columns([
            ("year", vec![2025.0, 2025.0]),
            ("month", vec![10.0, 10.0]),
            ("day", vec![11.0, 11.0]),
            ("hour", vec![22.0, 23.0]),
            ("T_forecast", vec![290.0, 300.0]),
            ("NO2_satellite", vec![1.0, 2.0]),
            ("O3_target", vec![30.0, 31.0]),
        ])
        .unwrap()
    }

    #[test]
    fn rolls_over_midnight_and_drops_targets() {
        let settings = FutureSynthesis {
            horizon_hours: 3,
            ..FutureSynthesis::default()
        };
        let future = synthesize_future(&history(), &ColumnLayout::default(), &settings).unwrap();
        assert_eq!(future.len(), 3);
        assert!(!future.has_column("O3_target"));
        assert_eq!(future.column("day").unwrap(), &[12.0, 12.0, 12.0]);
        assert_eq!(future.column("hour").unwrap(), &[0.0, 1.0, 2.0]);
        for value in future.column("T_forecast").unwrap() {
            assert!((value - 300.0).abs() <= 300.0 * 0.02 + 1e-9);
        }
    }

    #[test]
    fn same_seed_same_rows() {
        let settings = FutureSynthesis {
            horizon_hours: 5,
            forecast_start: NaiveDate::from_ymd_opt(2025, 10, 12)
                .and_then(|date| date.and_hms_opt(0, 0, 0)),
            ..FutureSynthesis::default()
        };
        let layout = ColumnLayout::default();
        let a = synthesize_future(&history(), &layout, &settings).unwrap();
        let b = synthesize_future(&history(), &layout, &settings).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.column("hour").unwrap()[0], 0.0);
        assert_eq!(a.column("day").unwrap()[0], 12.0);
    }

    #[test]
    fn zero_jitter_copies_the_template() {
        let settings = FutureSynthesis {
            horizon_hours: 2,
            jitter: 0.0,
            ..FutureSynthesis::default()
        };
        let future = synthesize_future(&history(), &ColumnLayout::default(), &settings).unwrap();
        assert_eq!(future.column("NO2_satellite").unwrap(), &[2.0, 2.0]);
    }
}
