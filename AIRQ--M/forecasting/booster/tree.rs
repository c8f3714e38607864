use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::{
    binning::{FeatureBins, MISSING_BIN},
    BoosterParams,
};

/// One node of a regression tree. Children are indices into the owning tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Terminal node; the value already includes the learning rate.
    Leaf {
        /// Contribution added to the prediction.
        value: f64,
    },
    /// Internal node sending `x[feature] <= threshold` left.
    Split {
        /// Feature column index.
        feature: usize,
        /// Inclusive upper bound of the left branch.
        threshold: f64,
        /// Direction taken by missing values.
        missing_left: bool,
        /// Left child index.
        left: usize,
        /// Right child index.
        right: usize,
    },
}

/// Binary regression tree stored as a node arena rooted at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Contribution of this tree for one feature row.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    missing_left,
                    left,
                    right,
                } => {
                    let value = row[*feature];
                    let go_left = if value.is_nan() {
                        *missing_left
                    } else {
                        value <= *threshold
                    };
                    idx = if go_left { *left } else { *right };
                }
            }
        }
    }

    /// Nodes in arena order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    missing_left: bool,
    gain: f64,
}

/// Grows one tree on binned data for the current gradients.
pub(super) struct TreeBuilder<'a> {
    pub(super) bins: &'a Array2<u16>,
    pub(super) cuts: &'a FeatureBins,
    pub(super) grad: &'a [f64],
    pub(super) hess: &'a [f64],
    pub(super) features: &'a [usize],
    pub(super) params: &'a BoosterParams,
}

impl TreeBuilder<'_> {
    /// Builds a tree over `rows`, adding each split's gain to `gain[feature]`.
    pub(super) fn build(&self, rows: &[usize], gain: &mut [f64]) -> RegressionTree {
        let mut nodes = Vec::new();
        self.grow(rows, 0, &mut nodes, gain);
        RegressionTree { nodes }
    }

    fn grow(&self, rows: &[usize], depth: usize, nodes: &mut Vec<Node>, gain: &mut [f64]) -> usize {
        let (g, h) = self.sums(rows);
        let idx = nodes.len();
        nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });
        if depth >= self.params.max_depth || h < 2.0 * self.params.min_child_weight {
            return idx;
        }
        let Some(split) = self.best_split(rows, g, h) else {
            return idx;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&row| {
            let code = self.bins[[row, split.feature]];
            if code == MISSING_BIN {
                split.missing_left
            } else {
                usize::from(code) <= split.bin
            }
        });
        let left = self.grow(&left_rows, depth + 1, nodes, gain);
        let right = self.grow(&right_rows, depth + 1, nodes, gain);
        gain[split.feature] += split.gain;
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: self.cuts.upper(split.feature, split.bin),
            missing_left: split.missing_left,
            left,
            right,
        };
        idx
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &row| (g + self.grad[row], h + self.hess[row]))
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.lambda) * self.params.learning_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.score(g, h);
        let mcw = self.params.min_child_weight;
        let mut best: Option<SplitCandidate> = None;
        for &feature in self.features {
            let n_bins = self.cuts.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![(0.0, 0.0); n_bins];
            let (mut miss_g, mut miss_h) = (0.0, 0.0);
            for &row in rows {
                let code = self.bins[[row, feature]];
                if code == MISSING_BIN {
                    miss_g += self.grad[row];
                    miss_h += self.hess[row];
                } else {
                    let slot = &mut hist[usize::from(code)];
                    slot.0 += self.grad[row];
                    slot.1 += self.hess[row];
                }
            }
            let directions: &[bool] = if miss_h > 0.0 { &[false, true] } else { &[false] };
            let (mut acc_g, mut acc_h) = (0.0, 0.0);
            for (bin, (bin_g, bin_h)) in hist.iter().take(n_bins - 1).enumerate() {
                acc_g += bin_g;
                acc_h += bin_h;
                for &missing_left in directions {
                    let (gl, hl) = if missing_left {
                        (acc_g + miss_g, acc_h + miss_h)
                    } else {
                        (acc_g, acc_h)
                    };
                    let (gr, hr) = (g - gl, h - hl);
                    if hl < mcw || hr < mcw {
                        continue;
                    }
                    let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent)
                        - self.params.gamma;
                    if gain > 0.0 && best.map_or(true, |current| gain > current.gain) {
                        best = Some(SplitCandidate {
                            feature,
                            bin,
                            missing_left,
                            gain,
                        });
                    }
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params() -> BoosterParams {
        BoosterParams {
            learning_rate: 1.0,
            lambda: 0.0,
            min_child_weight: 1.0,
            max_depth: 3,
            ..BoosterParams::default()
        }
    }

    #[test]
    fn step_function_is_split_at_the_jump() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = [0.0, 0.0, 10.0, 10.0];
        let cuts = FeatureBins::fit(x.view(), 256);
        let bins = cuts.bin_matrix(x.view());
        let grad: Vec<f64> = y.iter().map(|target| -target).collect();
        let hess = vec![1.0; 4];
        let params = params();
        let builder = TreeBuilder {
            bins: &bins,
            cuts: &cuts,
            grad: &grad,
            hess: &hess,
            features: &[0],
            params: &params,
        };
        let mut gain = vec![0.0];
        let tree = builder.build(&[0, 1, 2, 3], &mut gain);
        assert!(gain[0] > 0.0);
        assert!(matches!(tree.nodes()[0], Node::Split { threshold, .. } if (threshold - 2.0).abs() < f64::EPSILON));
        assert!((tree.predict_row(array![1.5].view())).abs() < 1e-12);
        assert!((tree.predict_row(array![3.5].view()) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn missing_values_follow_the_learned_direction() {
        let x = array![[1.0], [2.0], [f64::NAN], [f64::NAN], [5.0], [6.0]];
        let y = [0.0, 0.0, 8.0, 8.0, 8.0, 8.0];
        let cuts = FeatureBins::fit(x.view(), 256);
        let bins = cuts.bin_matrix(x.view());
        let grad: Vec<f64> = y.iter().map(|target| -target).collect();
        let hess = vec![1.0; 6];
        let params = params();
        let builder = TreeBuilder {
            bins: &bins,
            cuts: &cuts,
            grad: &grad,
            hess: &hess,
            features: &[0],
            params: &params,
        };
        let tree = builder.build(&[0, 1, 2, 3, 4, 5], &mut [0.0]);
        assert!((tree.predict_row(array![f64::NAN].view()) - 8.0).abs() < 1e-12);
        assert!(tree.predict_row(array![1.0].view()).abs() < 1e-12);
    }

    #[test]
    fn min_child_weight_blocks_small_children() {
        let x = array![[1.0], [2.0], [3.0]];
        let cuts = FeatureBins::fit(x.view(), 256);
        let bins = cuts.bin_matrix(x.view());
        let grad = vec![-1.0, -1.0, -9.0];
        let hess = vec![1.0; 3];
        let params = BoosterParams {
            min_child_weight: 2.0,
            ..params()
        };
        let builder = TreeBuilder {
            bins: &bins,
            cuts: &cuts,
            grad: &grad,
            hess: &hess,
            features: &[0],
            params: &params,
        };
        let tree = builder.build(&[0, 1, 2], &mut [0.0]);
        assert_eq!(tree.n_leaves(), 1);
    }
}
