use ndarray::{Array2, ArrayView2};

/// Bin index assigned to missing cells.
pub const MISSING_BIN: u16 = u16::MAX;

/// Largest supported `max_bins`; one code is reserved for [`MISSING_BIN`].
pub const MAX_BINS_LIMIT: usize = MISSING_BIN as usize;

/// Per-feature bin upper bounds, cut at quantiles of the training values.
///
/// A value falls in the first bin whose upper bound is `>= value`, so "bin `<= b`" and
/// "value `<= upper[b]`" select the same training rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBins {
    uppers: Vec<Vec<f64>>,
}

impl FeatureBins {
    /// Computes at most `max_bins` bounds per column from the non-missing values.
    #[must_use]
    pub fn fit(x: ArrayView2<'_, f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(1, MAX_BINS_LIMIT);
        let uppers = x
            .columns()
            .into_iter()
            .map(|column| {
                let mut values: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                values.sort_by(f64::total_cmp);
                cut_points(&values, max_bins)
            })
            .collect();
        Self { uppers }
    }

    /// Number of features.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.uppers.len()
    }

    /// Number of bins for one feature; zero when the feature was never observed.
    #[must_use]
    pub fn n_bins(&self, feature: usize) -> usize {
        self.uppers[feature].len()
    }

    /// Upper bound of one bin, used as the split threshold.
    #[must_use]
    pub fn upper(&self, feature: usize, bin: usize) -> f64 {
        self.uppers[feature][bin]
    }

    /// Bin of one value. Values above the last bound land in the last bin.
    #[must_use]
    pub fn bin(&self, feature: usize, value: f64) -> u16 {
        let uppers = &self.uppers[feature];
        if value.is_nan() || uppers.is_empty() {
            return MISSING_BIN;
        }
        let idx = uppers.partition_point(|upper| *upper < value).min(uppers.len() - 1);
        u16::try_from(idx).unwrap_or(MISSING_BIN - 1)
    }

    /// Bins every cell of `x`.
    #[must_use]
    pub fn bin_matrix(&self, x: ArrayView2<'_, f64>) -> Array2<u16> {
        Array2::from_shape_fn(x.dim(), |(row, feature)| self.bin(feature, x[[row, feature]]))
    }
}

fn cut_points(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    let mut unique = sorted.to_vec();
    unique.dedup();
    if unique.len() <= max_bins {
        return unique;
    }
    // k = max_bins picks the maximum, so the last bound always covers every training value.
    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..=max_bins)
        .map(|k| sorted[(k * n / max_bins).saturating_sub(1)])
        .collect();
    cuts.dedup();
    cuts
}
