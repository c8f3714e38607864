use indexmap::IndexMap;

use crate::{
    error::{ForecastError, ForecastResult},
    frame::SiteFrame,
    metrics::MetricsRecord,
    preprocess::{ColumnLayout, FeatureMatrix},
    trainer::TrainedModelSet,
};

/// Predictions per target column, in target order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predictions {
    values: IndexMap<String, Vec<f64>>,
}

impl Predictions {
    /// Predictions for one target.
    #[must_use]
    pub fn get(&self, target: &str) -> Option<&[f64]> {
        self.values.get(target).map(Vec::as_slice)
    }

    /// Target/prediction pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.values
            .iter()
            .map(|(target, values)| (target.as_str(), values.as_slice()))
    }

    /// Number of predicted rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.values.values().next().map_or(0, Vec::len)
    }

    /// Appends one `{stem}_predicted` column per target to `frame`.
    pub fn attach_to(&self, frame: &mut SiteFrame) -> ForecastResult<()> {
        for (target, values) in &self.values {
            frame.insert_column(ColumnLayout::prediction_column(target), values.clone())?;
        }
        Ok(())
    }
}

/// Applies every target's model (best checkpoint when recorded) to the scaled features.
pub fn predict(models: &TrainedModelSet, x: &FeatureMatrix) -> ForecastResult<Predictions> {
    let mut values = IndexMap::new();
    for (target, model) in models.iter() {
        let predicted = model.predict(x).map_err(|err| ForecastError::Training {
            target: target.to_string(),
            reason: err.to_string(),
        })?;
        values.insert(target.to_string(), predicted.to_vec());
    }
    Ok(Predictions { values })
}

/// Scores predictions against the true targets carried by `records`, one entry per target
/// that is present with at least one observed value. Absent ground truth yields an empty map.
#[must_use]
pub fn evaluate_if_possible(
    predictions: &Predictions,
    records: &SiteFrame,
) -> IndexMap<String, MetricsRecord> {
    predictions
        .iter()
        .filter_map(|(target, predicted)| {
            let observed = records.column(target)?;
            if observed.len() != predicted.len() || observed.iter().all(|value| value.is_nan()) {
                return None;
            }
            Some((target.to_string(), MetricsRecord::compute(observed, predicted)))
        })
        .collect()
}
