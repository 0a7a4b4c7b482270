use serde::{Deserialize, Serialize};

use super::{bins::BinSpec, lookup::LookupTable};
use crate::{
    classical_ml::{tree::TreeNode, TrainedModel},
    dataset::N_FEATURES,
};

/// Fractional bits of additive and linear score accumulators.
pub const SCORE_BITS: u32 = 16;

/// Signed fixed-point input format: `q = floor(x · 2^fractional_bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QFormat {
    /// Fractional bits, 0..=16.
    pub fractional_bits: u32,
}

impl Default for QFormat {
    fn default() -> Self {
        Self { fractional_bits: 8 }
    }
}

impl QFormat {
    /// `2^fractional_bits`.
    #[must_use]
    pub fn scale(self) -> f64 {
        f64::from(1u32 << self.fractional_bits)
    }

    /// Converts a reading, saturating at the `i32` bounds.
    #[must_use]
    pub fn to_q(self, value: f64) -> i32 {
        (value * self.scale()).floor() as i32
    }

    /// Converts a whole reading.
    #[must_use]
    pub fn to_q3(self, features: &[f64; N_FEATURES]) -> [i32; N_FEATURES] {
        features.map(|value| self.to_q(value))
    }

    /// Reading represented by `q`.
    #[must_use]
    pub fn from_q(self, q: i32) -> f64 {
        f64::from(q) / self.scale()
    }
}

/// Integer decision tree; `x_q <= threshold` goes left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixedNode {
    /// Label or fixed-point score.
    Leaf(i64),
    /// Integer threshold test.
    Split {
        /// Feature index.
        feature: usize,
        /// `floor(threshold · 2^fractional_bits)`.
        threshold: i32,
        /// Subtree for `x_q <= threshold`.
        left: Box<FixedNode>,
        /// Subtree for `x_q > threshold`.
        right: Box<FixedNode>,
    },
}

impl FixedNode {
    /// Converts a float tree, mapping leaf values through `leaf` and folding
    /// splits whose children are equal leaves.
    fn from_tree(node: &TreeNode, q: QFormat, leaf: &impl Fn(f64) -> i64) -> Self {
        match node {
            TreeNode::Leaf { value, .. } => Self::Leaf(leaf(*value)),
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let left = Self::from_tree(left, q, leaf);
                let right = Self::from_tree(right, q, leaf);
                let same = matches!((&left, &right), (Self::Leaf(a), Self::Leaf(b)) if a == b);
                if same {
                    left
                } else {
                    Self::Split {
                        feature: *feature,
                        threshold: q.to_q(*threshold),
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
            }
        }
    }

    /// Leaf reached by `input`.
    #[must_use]
    pub fn evaluate(&self, input: &[i32; N_FEATURES]) -> i64 {
        let mut node = self;
        loop {
            match node {
                Self::Leaf(value) => return *value,
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if input[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Total nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Split { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }
}

/// Integer form of a [`BinSpec`] over Q-format inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedBins {
    /// `round(min · 2^f)`.
    pub lo: i32,
    /// `round(max · 2^f)`.
    pub hi: i32,
    /// Bin count.
    pub bins: usize,
}

impl FixedBins {
    /// Converts a bin spec.
    #[must_use]
    pub fn from_spec(spec: &BinSpec, q: QFormat) -> Self {
        Self {
            lo: (spec.min * q.scale()).round() as i32,
            hi: (spec.max * q.scale()).round() as i32,
            bins: spec.bins,
        }
    }

    /// Same boundary rule as [`BinSpec::index`], in integers.
    #[must_use]
    pub fn index(&self, value: i32) -> usize {
        let last = self.bins.saturating_sub(1);
        if value <= self.lo {
            return 0;
        }
        if value >= self.hi {
            return last;
        }
        let offset = i64::from(value) - i64::from(self.lo);
        let span = i64::from(self.hi) - i64::from(self.lo);
        let idx = offset * self.bins as i64 / span;
        usize::try_from(idx).unwrap_or(0).min(last)
    }
}

/// Bit-packed lookup table program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedTable {
    /// Integer bins per feature.
    pub bins: [FixedBins; N_FEATURES],
    /// Labels, eight per byte, least significant bit first.
    pub packed: Vec<u8>,
}

impl FixedTable {
    fn label(&self, input: &[i32; N_FEATURES]) -> u8 {
        let [t, h, l] = [
            self.bins[0].index(input[0]),
            self.bins[1].index(input[1]),
            self.bins[2].index(input[2]),
        ];
        let idx = (t * self.bins[1].bins + h) * self.bins[2].bins + l;
        (self.packed[idx >> 3] >> (idx & 7)) & 1
    }
}

/// Integer-only decision program, interpreted here and rendered to C.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "program", rename_all = "snake_case")]
pub enum DecisionProgram {
    /// Single tree with 0/1 leaves.
    Tree {
        /// Root node.
        root: FixedNode,
    },
    /// Trees with 0/1 leaves; ON when more than half vote ON.
    Vote {
        /// Member trees.
        trees: Vec<FixedNode>,
    },
    /// Score `bias + Σ tree` in Q16; ON when positive.
    Additive {
        /// Initial score.
        bias: i64,
        /// Stage trees with pre-scaled leaves.
        trees: Vec<FixedNode>,
    },
    /// `Σ coefficient · x_q + bias`; ON when positive.
    Linear {
        /// Q16 coefficients on raw Q-format inputs.
        coefficients: [i64; N_FEATURES],
        /// Intercept scaled by `2^(16 + fractional_bits)`.
        bias: i64,
    },
    /// Lookup table indexed with integer bins.
    Table {
        /// Packed table.
        table: FixedTable,
    },
}

fn to_score(value: f64) -> i64 {
    (value * f64::from(1u32 << SCORE_BITS)).round() as i64
}

impl DecisionProgram {
    /// Translates the model's own decision logic.
    #[must_use]
    pub fn branch(model: &TrainedModel, q: QFormat) -> Self {
        let label = |value: f64| i64::from(value > 0.5);
        match model {
            TrainedModel::DecisionTree { tree, .. } => Self::Tree {
                root: FixedNode::from_tree(tree, q, &label),
            },
            TrainedModel::RandomForest { model, .. } => Self::Vote {
                trees: model
                    .trees()
                    .iter()
                    .map(|tree| FixedNode::from_tree(tree, q, &label))
                    .collect(),
            },
            TrainedModel::GradientBoosting { model, .. } => {
                let rate = model.learning_rate();
                let leaf = |value: f64| to_score(rate * value);
                Self::Additive {
                    bias: to_score(model.init()),
                    trees: model
                        .trees()
                        .iter()
                        .map(|tree| FixedNode::from_tree(tree, q, &leaf))
                        .collect(),
                }
            }
            TrainedModel::LogisticRegression { model, .. } => {
                // Fold the scaler: z = b + Σ w_i (x_i - μ_i) / σ_i.
                let scaler = model.scaler();
                let weights = model.weights();
                let slopes: [f64; N_FEATURES] =
                    std::array::from_fn(|idx| weights[idx] / scaler.scale[idx]);
                let intercept = model.bias()
                    - (0..N_FEATURES)
                        .map(|idx| slopes[idx] * scaler.mean[idx])
                        .sum::<f64>();
                Self::Linear {
                    coefficients: slopes.map(to_score),
                    bias: (intercept * f64::from(1u32 << SCORE_BITS) * q.scale()).round() as i64,
                }
            }
        }
    }

    /// Packs a lookup table.
    #[must_use]
    pub fn table(table: &LookupTable, q: QFormat) -> Self {
        let specs = table.grid().specs();
        let mut packed = vec![0u8; table.len().div_ceil(8)];
        for (idx, &label) in table.labels().iter().enumerate() {
            packed[idx >> 3] |= (label & 1) << (idx & 7);
        }
        Self::Table {
            table: FixedTable {
                bins: specs.map(|spec| FixedBins::from_spec(&spec, q)),
                packed,
            },
        }
    }

    /// Label for Q-format inputs.
    #[must_use]
    pub fn evaluate(&self, input: &[i32; N_FEATURES]) -> u8 {
        match self {
            Self::Tree { root } => u8::from(root.evaluate(input) != 0),
            Self::Vote { trees } => {
                let votes = trees.iter().filter(|tree| tree.evaluate(input) != 0).count();
                u8::from(2 * votes > trees.len())
            }
            Self::Additive { bias, trees } => {
                let score = trees
                    .iter()
                    .fold(*bias, |acc, tree| acc.saturating_add(tree.evaluate(input)));
                u8::from(score > 0)
            }
            Self::Linear { coefficients, bias } => {
                let score = coefficients
                    .iter()
                    .zip(input)
                    .fold(*bias, |acc, (coefficient, value)| {
                        acc.saturating_add(coefficient.saturating_mul(i64::from(*value)))
                    });
                u8::from(score > 0)
            }
            Self::Table { table } => table.label(input),
        }
    }

    /// Decision nodes the generated code contains; tables count as zero.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            Self::Tree { root } => root.node_count(),
            Self::Vote { trees } | Self::Additive { trees, .. } => {
                trees.iter().map(FixedNode::node_count).sum()
            }
            Self::Linear { .. } => N_FEATURES,
            Self::Table { .. } => 0,
        }
    }

    /// Whether this is the table form.
    #[must_use]
    pub const fn is_table(&self) -> bool {
        matches!(self, Self::Table { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classical_ml::{Criterion, HyperParameters, LogisticParams, TreeParams},
        dataset::Dataset,
        quantize::bins::QuantizationGrid,
    };

    #[test]
    fn q_conversion_floors() {
        let q = QFormat::default();
        assert_eq!(q.to_q(1.5), 384);
        assert_eq!(q.to_q(-0.001), -1);
        assert_eq!(q.to_q(f64::NAN), 0);
        assert!((q.from_q(384) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn fixed_bins_follow_float_rule_on_q_grid() {
        let q = QFormat::default();
        let spec = BinSpec::new(13.0, 40.0, 32);
        let fixed = FixedBins::from_spec(&spec, q);
        for raw in (13 * 256 - 40)..=(40 * 256 + 40) {
            assert_eq!(fixed.index(raw), spec.index(q.from_q(raw)), "q={raw}");
        }
    }

    #[test]
    fn tree_program_matches_model_on_q_inputs() {
        let params = HyperParameters::DecisionTree(TreeParams {
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: Criterion::Gini,
        });
        let model = TrainedModel::fit(&params, &Dataset::synthetic(2_000, 6), 42).unwrap();
        let q = QFormat::default();
        let program = DecisionProgram::branch(&model, q);
        let grid = QuantizationGrid::default();
        for key in grid.keys().step_by(7) {
            let point = grid.midpoint(key);
            assert_eq!(program.evaluate(&q.to_q3(&point)), model.predict(&point));
        }
        assert!(program.node_count() >= 3);
    }

    #[test]
    fn linear_program_folds_scaler() {
        let params = HyperParameters::LogisticRegression(LogisticParams {
            c: 1.0,
            max_iter: 50,
        });
        let model = TrainedModel::fit(&params, &Dataset::synthetic(1_500, 8), 42).unwrap();
        let q = QFormat::default();
        let program = DecisionProgram::branch(&model, q);
        assert_eq!(program.node_count(), N_FEATURES);
        assert_eq!(program.evaluate(&q.to_q3(&[14.0, 80.0, 10.0])), 1);
        assert_eq!(program.evaluate(&q.to_q3(&[39.0, 80.0, 95.0])), 0);
    }

    #[test]
    fn table_program_unpacks_bits() {
        let params = HyperParameters::DecisionTree(TreeParams {
            max_depth: 4,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: Criterion::Entropy,
        });
        let model = TrainedModel::fit(&params, &Dataset::synthetic(800, 6), 42).unwrap();
        let table = LookupTable::build(&model, QuantizationGrid::default());
        let q = QFormat::default();
        let program = DecisionProgram::table(&table, q);
        assert!(program.is_table());
        assert_eq!(program.node_count(), 0);
        for key in table.grid().keys() {
            let input = q.to_q3(&table.grid().midpoint(key));
            assert_eq!(program.evaluate(&input), table.get(key));
        }
    }
}
