use serde::{Deserialize, Serialize};

use crate::classical_ml::{
    AlgorithmKind, BoostingParams, Criterion, ForestParams, HyperParameters, LogisticParams,
    MaxFeatures, TreeParams,
};

fn default_max_iter() -> Vec<usize> {
    vec![100]
}

fn default_min_samples_split() -> Vec<usize> {
    vec![2]
}

fn default_min_samples_leaf() -> Vec<usize> {
    vec![1]
}

fn default_criterion() -> Vec<Criterion> {
    vec![Criterion::Gini]
}

fn default_max_features() -> Vec<MaxFeatures> {
    vec![MaxFeatures::Sqrt]
}

fn default_subsample() -> Vec<f64> {
    vec![1.0]
}

/// Logistic regression value lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticGrid {
    /// Inverse regularization strengths.
    pub c: Vec<f64>,
    /// Newton iteration caps.
    #[serde(default = "default_max_iter")]
    pub max_iter: Vec<usize>,
}

/// Decision tree value lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeGrid {
    /// Depth limits.
    pub max_depth: Vec<usize>,
    /// Minimum node sizes for splitting.
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: Vec<usize>,
    /// Minimum leaf sizes.
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: Vec<usize>,
    /// Impurity measures.
    #[serde(default = "default_criterion")]
    pub criterion: Vec<Criterion>,
}

/// Random forest value lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestGrid {
    /// Tree counts.
    pub n_estimators: Vec<usize>,
    /// Depth limits.
    pub max_depth: Vec<usize>,
    /// Minimum node sizes for splitting.
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: Vec<usize>,
    /// Minimum leaf sizes.
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: Vec<usize>,
    /// Per-node feature subset sizes.
    #[serde(default = "default_max_features")]
    pub max_features: Vec<MaxFeatures>,
}

/// Gradient boosting value lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingGrid {
    /// Stage counts.
    pub n_estimators: Vec<usize>,
    /// Shrinkage values.
    pub learning_rate: Vec<f64>,
    /// Stage tree depths.
    pub max_depth: Vec<usize>,
    /// Row fractions.
    #[serde(default = "default_subsample")]
    pub subsample: Vec<f64>,
}

/// Typed hyperparameter grid of one algorithm family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlgorithmGrid {
    /// Logistic regression grid.
    LogisticRegression(LogisticGrid),
    /// Decision tree grid.
    DecisionTree(TreeGrid),
    /// Random forest grid.
    RandomForest(ForestGrid),
    /// Gradient boosting grid.
    GradientBoosting(BoostingGrid),
}

impl AlgorithmGrid {
    /// Algorithm family of the grid.
    #[must_use]
    pub const fn kind(&self) -> AlgorithmKind {
        match self {
            Self::LogisticRegression(_) => AlgorithmKind::LogisticRegression,
            Self::DecisionTree(_) => AlgorithmKind::DecisionTree,
            Self::RandomForest(_) => AlgorithmKind::RandomForest,
            Self::GradientBoosting(_) => AlgorithmKind::GradientBoosting,
        }
    }

    /// Cartesian product of the value lists, first parameter outermost.
    /// Empty when any list is empty.
    #[must_use]
    pub fn combinations(&self) -> Vec<HyperParameters> {
        let mut points = Vec::new();
        match self {
            Self::LogisticRegression(grid) => {
                for &c in &grid.c {
                    for &max_iter in &grid.max_iter {
                        points.push(HyperParameters::LogisticRegression(LogisticParams {
                            c,
                            max_iter,
                        }));
                    }
                }
            }
            Self::DecisionTree(grid) => {
                for &max_depth in &grid.max_depth {
                    for &min_samples_split in &grid.min_samples_split {
                        for &min_samples_leaf in &grid.min_samples_leaf {
                            for &criterion in &grid.criterion {
                                points.push(HyperParameters::DecisionTree(TreeParams {
                                    max_depth,
                                    min_samples_split,
                                    min_samples_leaf,
                                    criterion,
                                }));
                            }
                        }
                    }
                }
            }
            Self::RandomForest(grid) => {
                for &n_estimators in &grid.n_estimators {
                    for &max_depth in &grid.max_depth {
                        for &min_samples_split in &grid.min_samples_split {
                            for &min_samples_leaf in &grid.min_samples_leaf {
                                for &max_features in &grid.max_features {
                                    points.push(HyperParameters::RandomForest(ForestParams {
                                        n_estimators,
                                        max_depth,
                                        min_samples_split,
                                        min_samples_leaf,
                                        max_features,
                                    }));
                                }
                            }
                        }
                    }
                }
            }
            Self::GradientBoosting(grid) => {
                for &n_estimators in &grid.n_estimators {
                    for &learning_rate in &grid.learning_rate {
                        for &max_depth in &grid.max_depth {
                            for &subsample in &grid.subsample {
                                points.push(HyperParameters::GradientBoosting(BoostingParams {
                                    n_estimators,
                                    learning_rate,
                                    max_depth,
                                    subsample,
                                }));
                            }
                        }
                    }
                }
            }
        }
        points
    }
}

/// Named model specification: one grid search, one trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Unique name used in reports.
    pub name: String,
    /// Grid to search.
    #[serde(flatten)]
    pub algorithm: AlgorithmGrid,
}

impl ModelSpec {
    /// Creates a specification.
    #[must_use]
    pub fn new(name: impl Into<String>, algorithm: AlgorithmGrid) -> Self {
        Self {
            name: name.into(),
            algorithm,
        }
    }

    /// Default specifications: a scaled logistic baseline and three tree
    /// families, each with a moderate grid.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "logistic_regression",
                AlgorithmGrid::LogisticRegression(LogisticGrid {
                    c: vec![0.01, 0.1, 1.0, 10.0, 100.0],
                    max_iter: vec![1000],
                }),
            ),
            Self::new(
                "decision_tree",
                AlgorithmGrid::DecisionTree(TreeGrid {
                    max_depth: vec![5, 10, 15, 20],
                    min_samples_split: vec![2, 5, 10],
                    min_samples_leaf: vec![1, 2, 4],
                    criterion: vec![Criterion::Gini, Criterion::Entropy],
                }),
            ),
            Self::new(
                "random_forest",
                AlgorithmGrid::RandomForest(ForestGrid {
                    n_estimators: vec![50, 100, 200],
                    max_depth: vec![10, 15, 20],
                    min_samples_split: vec![2, 5],
                    min_samples_leaf: vec![1, 2],
                    max_features: vec![MaxFeatures::Sqrt],
                }),
            ),
            Self::new(
                "gradient_boosting",
                AlgorithmGrid::GradientBoosting(BoostingGrid {
                    n_estimators: vec![50, 100, 150],
                    learning_rate: vec![0.01, 0.1, 0.2],
                    max_depth: vec![3, 5, 7],
                    subsample: vec![0.8, 1.0],
                }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinations_enumerate_first_parameter_outermost() {
        let grid = AlgorithmGrid::LogisticRegression(LogisticGrid {
            c: vec![0.1, 1.0],
            max_iter: vec![10, 20],
        });
        let points: Vec<(f64, usize)> = grid
            .combinations()
            .into_iter()
            .map(|point| match point {
                HyperParameters::LogisticRegression(p) => (p.c, p.max_iter),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(points, vec![(0.1, 10), (0.1, 20), (1.0, 10), (1.0, 20)]);
    }

    #[test]
    fn default_grid_sizes() {
        let sizes: Vec<usize> = ModelSpec::defaults()
            .iter()
            .map(|spec| spec.algorithm.combinations().len())
            .collect();
        assert_eq!(sizes, vec![5, 72, 36, 54]);
    }

    #[test]
    fn empty_value_list_yields_empty_grid() {
        let grid = AlgorithmGrid::DecisionTree(TreeGrid {
            max_depth: Vec::new(),
            min_samples_split: vec![2],
            min_samples_leaf: vec![1],
            criterion: vec![Criterion::Gini],
        });
        assert!(grid.combinations().is_empty());
    }

    #[test]
    fn spec_parses_from_flat_toml_table() {
        let spec: ModelSpec = toml::from_str(
            r#"
            name = "shallow_forest"
            kind = "random_forest"
            n_estimators = [5]
            max_depth = [4]
            "#,
        )
        .unwrap();
        assert_eq!(spec.algorithm.kind(), AlgorithmKind::RandomForest);
        match spec.algorithm {
            AlgorithmGrid::RandomForest(grid) => {
                assert_eq!(grid.min_samples_split, vec![2]);
                assert_eq!(grid.max_features, vec![MaxFeatures::Sqrt]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
