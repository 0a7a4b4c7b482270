use rand::{rngs::StdRng, seq::index::sample};
use serde::{Deserialize, Serialize};

use super::{binning::FeatureBinner, Criterion};
use crate::dataset::N_FEATURES;

/// Number of distinct feature codes.
const CODES: usize = 256;

/// Node of a fitted binary tree. Rows with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Terminal node.
    Leaf {
        /// Positive fraction for classification trees, Newton step for
        /// boosting trees.
        value: f64,
        /// Training rows that reached the leaf.
        samples: usize,
    },
    /// Internal threshold test.
    Split {
        /// Feature index in training order.
        feature: usize,
        /// Real-valued threshold.
        threshold: f64,
        /// Subtree for `x <= threshold`.
        left: Box<TreeNode>,
        /// Subtree for `x > threshold`.
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    /// Leaf value reached by `features`.
    #[must_use]
    pub fn value(&self, features: &[f64; N_FEATURES]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Self::Leaf { value, .. } => return *value,
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Longest root-to-leaf path, counted in splits.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Leaf { .. } => 0,
            Self::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Total number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            Self::Leaf { .. } => 1,
            Self::Split { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }
}

/// Growth limits shared by every tree-based learner.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrowthLimits {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per node; fewer than [`N_FEATURES`] draws a random subset.
    pub max_features: usize,
}

/// Per-row targets and the node statistics a tree is grown against.
pub(crate) trait Objective: Sync {
    /// Additive node statistics.
    type Stats: Copy + Default;

    fn add(&self, stats: &mut Self::Stats, row: usize);
    fn combine(a: &Self::Stats, b: &Self::Stats) -> Self::Stats;
    fn difference(a: &Self::Stats, b: &Self::Stats) -> Self::Stats;
    fn count(stats: &Self::Stats) -> usize;
    /// Node quality, higher is better; split gain is `left + right - parent`.
    fn score(&self, stats: &Self::Stats) -> f64;
    fn leaf_value(&self, stats: &Self::Stats) -> f64;
    fn is_pure(&self, stats: &Self::Stats) -> bool;
}

/// Binary class labels scored by Gini impurity or entropy.
pub(crate) struct Classification<'a> {
    pub labels: &'a [u8],
    pub criterion: Criterion,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ClassCounts {
    total: usize,
    positive: usize,
}

impl Objective for Classification<'_> {
    type Stats = ClassCounts;

    fn add(&self, stats: &mut ClassCounts, row: usize) {
        stats.total += 1;
        stats.positive += usize::from(self.labels[row]);
    }

    fn combine(a: &ClassCounts, b: &ClassCounts) -> ClassCounts {
        ClassCounts {
            total: a.total + b.total,
            positive: a.positive + b.positive,
        }
    }

    fn difference(a: &ClassCounts, b: &ClassCounts) -> ClassCounts {
        ClassCounts {
            total: a.total - b.total,
            positive: a.positive - b.positive,
        }
    }

    fn count(stats: &ClassCounts) -> usize {
        stats.total
    }

    fn score(&self, stats: &ClassCounts) -> f64 {
        if stats.total == 0 {
            return 0.0;
        }
        let n = stats.total as f64;
        let p = stats.positive as f64 / n;
        let impurity = match self.criterion {
            Criterion::Gini => 2.0 * p * (1.0 - p),
            Criterion::Entropy => -(xlog2x(p) + xlog2x(1.0 - p)),
        };
        -n * impurity
    }

    fn leaf_value(&self, stats: &ClassCounts) -> f64 {
        if stats.total == 0 {
            0.0
        } else {
            stats.positive as f64 / stats.total as f64
        }
    }

    fn is_pure(&self, stats: &ClassCounts) -> bool {
        stats.positive == 0 || stats.positive == stats.total
    }
}

fn xlog2x(x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else {
        x * x.log2()
    }
}

/// Log-loss gradients for boosting; leaves hold the Newton step.
pub(crate) struct Regression<'a> {
    pub residuals: &'a [f64],
    pub hessians: &'a [f64],
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GradientSums {
    count: usize,
    residual: f64,
    hessian: f64,
}

/// Largest absolute Newton step stored in a leaf.
const MAX_LEAF_STEP: f64 = 8.0;

impl Objective for Regression<'_> {
    type Stats = GradientSums;

    fn add(&self, stats: &mut GradientSums, row: usize) {
        stats.count += 1;
        stats.residual += self.residuals[row];
        stats.hessian += self.hessians[row];
    }

    fn combine(a: &GradientSums, b: &GradientSums) -> GradientSums {
        GradientSums {
            count: a.count + b.count,
            residual: a.residual + b.residual,
            hessian: a.hessian + b.hessian,
        }
    }

    fn difference(a: &GradientSums, b: &GradientSums) -> GradientSums {
        GradientSums {
            count: a.count - b.count,
            residual: a.residual - b.residual,
            hessian: a.hessian - b.hessian,
        }
    }

    fn count(stats: &GradientSums) -> usize {
        stats.count
    }

    fn score(&self, stats: &GradientSums) -> f64 {
        if stats.count == 0 {
            0.0
        } else {
            stats.residual * stats.residual / stats.count as f64
        }
    }

    fn leaf_value(&self, stats: &GradientSums) -> f64 {
        if stats.hessian <= f64::EPSILON {
            return 0.0;
        }
        (stats.residual / stats.hessian).clamp(-MAX_LEAF_STEP, MAX_LEAF_STEP)
    }

    fn is_pure(&self, _stats: &GradientSums) -> bool {
        false
    }
}

/// Grows one tree over pre-encoded rows with histogram split search.
pub(crate) struct TreeGrower<'a, O: Objective> {
    pub binner: &'a FeatureBinner,
    pub codes: &'a [[u8; N_FEATURES]],
    pub objective: &'a O,
    pub limits: GrowthLimits,
}

struct SplitChoice {
    feature: usize,
    code: usize,
    gain: f64,
}

/// Gains below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

impl<O: Objective> TreeGrower<'_, O> {
    /// Grows a tree over `rows`; `rng` is only consulted for feature subsets.
    pub fn grow(&self, rows: Vec<usize>, rng: &mut StdRng) -> TreeNode {
        self.grow_node(rows, 0, rng)
    }

    fn grow_node(&self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> TreeNode {
        let mut stats = O::Stats::default();
        for &row in &rows {
            self.objective.add(&mut stats, row);
        }
        let leaf = TreeNode::Leaf {
            value: self.objective.leaf_value(&stats),
            samples: rows.len(),
        };
        if depth >= self.limits.max_depth
            || rows.len() < self.limits.min_samples_split
            || rows.len() < 2 * self.limits.min_samples_leaf
            || self.objective.is_pure(&stats)
        {
            return leaf;
        }

        let Some(choice) = self.best_split(&rows, &stats, rng) else {
            return leaf;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&row| usize::from(self.codes[row][choice.feature]) <= choice.code);
        TreeNode::Split {
            feature: choice.feature,
            threshold: self.binner.thresholds(choice.feature)[choice.code],
            left: Box::new(self.grow_node(left_rows, depth + 1, rng)),
            right: Box::new(self.grow_node(right_rows, depth + 1, rng)),
        }
    }

    fn candidate_features(&self, rng: &mut StdRng) -> Vec<usize> {
        if self.limits.max_features >= N_FEATURES {
            return (0..N_FEATURES).collect();
        }
        let mut features = sample(rng, N_FEATURES, self.limits.max_features.max(1)).into_vec();
        features.sort_unstable();
        features
    }

    fn best_split(&self, rows: &[usize], parent: &O::Stats, rng: &mut StdRng) -> Option<SplitChoice> {
        let parent_score = self.objective.score(parent);
        let mut best: Option<SplitChoice> = None;
        for feature in self.candidate_features(rng) {
            let n_thresholds = self.binner.thresholds(feature).len();
            if n_thresholds == 0 {
                continue;
            }
            let mut histogram = vec![O::Stats::default(); CODES];
            for &row in rows {
                let code = usize::from(self.codes[row][feature]);
                self.objective.add(&mut histogram[code], row);
            }
            let mut left = O::Stats::default();
            for (code, bucket) in histogram.iter().enumerate().take(n_thresholds) {
                left = O::combine(&left, bucket);
                let left_count = O::count(&left);
                let right_count = rows.len() - left_count;
                if left_count < self.limits.min_samples_leaf {
                    continue;
                }
                if right_count < self.limits.min_samples_leaf {
                    break;
                }
                let right = O::difference(parent, &left);
                let gain =
                    self.objective.score(&left) + self.objective.score(&right) - parent_score;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitChoice {
                        feature,
                        code,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Sample};
    use rand::SeedableRng;

    fn limits(max_depth: usize) -> GrowthLimits {
        GrowthLimits {
            max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: N_FEATURES,
        }
    }

    #[test]
    fn separates_threshold_rule() {
        let dataset = Dataset::from_samples(
            (0..40)
                .map(|i| {
                    let t = 13.0 + f64::from(i) * 0.5;
                    Sample::new(t, 70.0, 50.0, u8::from(t < 20.0))
                })
                .collect(),
        );
        let binner = FeatureBinner::fit(&dataset);
        let codes = binner.encode(&dataset);
        let labels = dataset.labels();
        let objective = Classification {
            labels: &labels,
            criterion: Criterion::Gini,
        };
        let grower = TreeGrower {
            binner: &binner,
            codes: &codes,
            objective: &objective,
            limits: limits(4),
        };
        let tree = grower.grow((0..dataset.len()).collect(), &mut StdRng::seed_from_u64(0));
        match &tree {
            TreeNode::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert!((threshold - 19.75).abs() < 1e-12);
            }
            TreeNode::Leaf { .. } => panic!("expected a split"),
        }
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.node_count(), 3);
        assert!((tree.value(&[15.0, 70.0, 50.0]) - 1.0).abs() < f64::EPSILON);
        assert!(tree.value(&[25.0, 70.0, 50.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn respects_depth_and_leaf_limits() {
        let dataset = Dataset::synthetic(1_000, 3);
        let binner = FeatureBinner::fit(&dataset);
        let codes = binner.encode(&dataset);
        let labels = dataset.labels();
        let objective = Classification {
            labels: &labels,
            criterion: Criterion::Entropy,
        };
        let grower = TreeGrower {
            binner: &binner,
            codes: &codes,
            objective: &objective,
            limits: GrowthLimits {
                min_samples_leaf: 30,
                ..limits(3)
            },
        };
        let tree = grower.grow((0..dataset.len()).collect(), &mut StdRng::seed_from_u64(0));
        assert!(tree.depth() <= 3);
        fn min_leaf(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { samples, .. } => *samples,
                TreeNode::Split { left, right, .. } => min_leaf(left).min(min_leaf(right)),
            }
        }
        assert!(min_leaf(&tree) >= 30);
    }

    #[test]
    fn regression_leaves_hold_newton_step() {
        let residuals = [0.5, 0.5, -0.5, -0.5];
        let hessians = [0.25; 4];
        let objective = Regression {
            residuals: &residuals,
            hessians: &hessians,
        };
        let mut stats = GradientSums::default();
        objective.add(&mut stats, 0);
        objective.add(&mut stats, 1);
        assert!((objective.leaf_value(&stats) - 2.0).abs() < 1e-12);
    }
}
