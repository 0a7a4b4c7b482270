//! Supported classifiers, their hyperparameters and the fitted model enum.

/// Candidate split thresholds.
pub mod binning;
/// Log-loss gradient boosting.
pub mod boosting;
/// Bagged random forest.
pub mod forest;
/// Standardized L2 logistic regression.
pub mod logistic;
/// Histogram-based CART trees.
pub mod tree;

use std::fmt;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{Dataset, FEATURE_NAMES, N_FEATURES};
use boosting::GradientBoostingModel;
use forest::RandomForestModel;
use logistic::LogisticModel;
use tree::{Classification, GrowthLimits, TreeGrower, TreeNode};

/// Closed set of algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Standardized L2 logistic regression.
    LogisticRegression,
    /// Single CART tree.
    DecisionTree,
    /// Bagged trees with majority vote.
    RandomForest,
    /// Log-loss gradient boosting.
    GradientBoosting,
}

impl AlgorithmKind {
    /// Snake-case identifier used in configs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LogisticRegression => "logistic_regression",
            Self::DecisionTree => "decision_tree",
            Self::RandomForest => "random_forest",
            Self::GradientBoosting => "gradient_boosting",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Impurity measure for classification trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Gini impurity.
    Gini,
    /// Shannon entropy.
    Entropy,
}

/// Features examined at each forest node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `floor(sqrt(n))`, at least one.
    Sqrt,
    /// Every feature.
    All,
}

impl MaxFeatures {
    /// Number of features for `n` inputs.
    #[must_use]
    pub fn resolve(self, n: usize) -> usize {
        match self {
            Self::Sqrt => ((n as f64).sqrt().floor() as usize).max(1),
            Self::All => n,
        }
    }
}

/// Logistic regression settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Inverse regularization strength, > 0.
    pub c: f64,
    /// Newton iteration cap, >= 1.
    pub max_iter: usize,
}

/// Decision tree settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Depth limit, >= 1.
    pub max_depth: usize,
    /// Smallest node that may split, >= 2.
    pub min_samples_split: usize,
    /// Smallest allowed leaf, >= 1.
    pub min_samples_leaf: usize,
    /// Impurity measure.
    pub criterion: Criterion,
}

/// Random forest settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees, >= 1.
    pub n_estimators: usize,
    /// Depth limit per tree, >= 1.
    pub max_depth: usize,
    /// Smallest node that may split, >= 2.
    pub min_samples_split: usize,
    /// Smallest allowed leaf, >= 1.
    pub min_samples_leaf: usize,
    /// Features drawn per node.
    pub max_features: MaxFeatures,
}

/// Gradient boosting settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    /// Boosting stages, >= 1.
    pub n_estimators: usize,
    /// Shrinkage in (0, 1].
    pub learning_rate: f64,
    /// Depth of each stage tree, >= 1.
    pub max_depth: usize,
    /// Row fraction per stage in (0, 1].
    pub subsample: f64,
}

/// One point of a hyperparameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HyperParameters {
    /// Logistic regression.
    LogisticRegression(LogisticParams),
    /// Decision tree.
    DecisionTree(TreeParams),
    /// Random forest.
    RandomForest(ForestParams),
    /// Gradient boosting.
    GradientBoosting(BoostingParams),
}

fn check_tree_limits(
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
) -> Result<(), String> {
    if max_depth == 0 {
        return Err("max_depth must be at least 1".into());
    }
    if min_samples_split < 2 {
        return Err(format!(
            "min_samples_split must be at least 2, got {min_samples_split}"
        ));
    }
    if min_samples_leaf == 0 {
        return Err("min_samples_leaf must be at least 1".into());
    }
    Ok(())
}

impl HyperParameters {
    /// Algorithm family of this point.
    #[must_use]
    pub const fn kind(&self) -> AlgorithmKind {
        match self {
            Self::LogisticRegression(_) => AlgorithmKind::LogisticRegression,
            Self::DecisionTree(_) => AlgorithmKind::DecisionTree,
            Self::RandomForest(_) => AlgorithmKind::RandomForest,
            Self::GradientBoosting(_) => AlgorithmKind::GradientBoosting,
        }
    }

    /// Rejects values the learners cannot fit with.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::LogisticRegression(p) => {
                if !(p.c.is_finite() && p.c > 0.0) {
                    return Err(format!("C must be a positive finite number, got {}", p.c));
                }
                if p.max_iter == 0 {
                    return Err("max_iter must be at least 1".into());
                }
                Ok(())
            }
            Self::DecisionTree(p) => {
                check_tree_limits(p.max_depth, p.min_samples_split, p.min_samples_leaf)
            }
            Self::RandomForest(p) => {
                if p.n_estimators == 0 {
                    return Err("n_estimators must be at least 1".into());
                }
                check_tree_limits(p.max_depth, p.min_samples_split, p.min_samples_leaf)
            }
            Self::GradientBoosting(p) => {
                if p.n_estimators == 0 {
                    return Err("n_estimators must be at least 1".into());
                }
                if !(p.learning_rate > 0.0 && p.learning_rate <= 1.0) {
                    return Err(format!(
                        "learning_rate must be in (0, 1], got {}",
                        p.learning_rate
                    ));
                }
                if !(p.subsample > 0.0 && p.subsample <= 1.0) {
                    return Err(format!("subsample must be in (0, 1], got {}", p.subsample));
                }
                check_tree_limits(p.max_depth, 2, 1)
            }
        }
    }

    /// Upper bound on learned parameters, used to break grid-search ties
    /// in favour of smaller models.
    #[must_use]
    pub fn effective_parameters(&self) -> usize {
        let leaves = |depth: usize| 2usize.saturating_pow(u32::try_from(depth).unwrap_or(u32::MAX));
        match self {
            Self::LogisticRegression(_) => N_FEATURES + 1,
            Self::DecisionTree(p) => leaves(p.max_depth),
            Self::RandomForest(p) => p.n_estimators.saturating_mul(leaves(p.max_depth)),
            Self::GradientBoosting(p) => p.n_estimators.saturating_mul(leaves(p.max_depth)),
        }
    }
}

/// Why a specification could not produce a model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrainingError {
    /// The grid has no combinations.
    #[error("hyperparameter grid is empty")]
    EmptyGrid,
    /// A grid combination is invalid.
    #[error("invalid hyperparameters: {0}")]
    InvalidHyperParameters(String),
    /// Training data holds a single label.
    #[error("training data contains only class {0}")]
    SingleClass(u8),
    /// Too few rows of a class for the requested folds.
    #[error("class {class} has {count} samples, fewer than {folds} folds")]
    InsufficientClassMembers {
        /// Label lacking samples.
        class: u8,
        /// Samples available.
        count: usize,
        /// Folds requested.
        folds: usize,
    },
    /// No rows to fit on.
    #[error("training data is empty")]
    EmptyTrainingSet,
    /// Solver failure.
    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Inference cost on the target device; compares by members, then depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InferenceCost {
    /// Trees (or linear units) evaluated per prediction.
    pub members: usize,
    /// Deepest path through any member.
    pub depth: usize,
}

/// Fitted classifier with the hyperparameters it was fitted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    /// Logistic regression.
    LogisticRegression {
        /// Fitted model.
        model: LogisticModel,
        /// Selected settings.
        params: LogisticParams,
    },
    /// Decision tree.
    DecisionTree {
        /// Fitted tree.
        tree: TreeNode,
        /// Selected settings.
        params: TreeParams,
    },
    /// Random forest.
    RandomForest {
        /// Fitted forest.
        model: RandomForestModel,
        /// Selected settings.
        params: ForestParams,
    },
    /// Gradient boosting.
    GradientBoosting {
        /// Fitted ensemble.
        model: GradientBoostingModel,
        /// Selected settings.
        params: BoostingParams,
    },
}

impl TrainedModel {
    /// Fits the algorithm selected by `params` on every row of `dataset`.
    pub fn fit(
        params: &HyperParameters,
        dataset: &Dataset,
        seed: u64,
    ) -> Result<Self, TrainingError> {
        params.validate().map_err(TrainingError::InvalidHyperParameters)?;
        if dataset.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }
        let balance = dataset.class_balance();
        if balance.on == 0 || balance.off == 0 {
            return Err(TrainingError::SingleClass(u8::from(balance.on > 0)));
        }
        Ok(match *params {
            HyperParameters::LogisticRegression(params) => Self::LogisticRegression {
                model: LogisticModel::fit(&params, dataset)?,
                params,
            },
            HyperParameters::DecisionTree(params) => Self::DecisionTree {
                tree: fit_tree(&params, dataset, seed),
                params,
            },
            HyperParameters::RandomForest(params) => Self::RandomForest {
                model: RandomForestModel::fit(&params, dataset, seed),
                params,
            },
            HyperParameters::GradientBoosting(params) => Self::GradientBoosting {
                model: GradientBoostingModel::fit(&params, dataset, seed),
                params,
            },
        })
    }

    /// Algorithm family.
    #[must_use]
    pub const fn kind(&self) -> AlgorithmKind {
        match self {
            Self::LogisticRegression { .. } => AlgorithmKind::LogisticRegression,
            Self::DecisionTree { .. } => AlgorithmKind::DecisionTree,
            Self::RandomForest { .. } => AlgorithmKind::RandomForest,
            Self::GradientBoosting { .. } => AlgorithmKind::GradientBoosting,
        }
    }

    /// Settings the model was fitted with.
    #[must_use]
    pub const fn hyperparameters(&self) -> HyperParameters {
        match self {
            Self::LogisticRegression { params, .. } => HyperParameters::LogisticRegression(*params),
            Self::DecisionTree { params, .. } => HyperParameters::DecisionTree(*params),
            Self::RandomForest { params, .. } => HyperParameters::RandomForest(*params),
            Self::GradientBoosting { params, .. } => HyperParameters::GradientBoosting(*params),
        }
    }

    /// Feature order the model expects.
    #[must_use]
    pub const fn feature_order(&self) -> [&'static str; N_FEATURES] {
        FEATURE_NAMES
    }

    /// Heater label for one reading.
    #[must_use]
    pub fn predict(&self, features: &[f64; N_FEATURES]) -> u8 {
        match self {
            Self::LogisticRegression { model, .. } => model.predict(features),
            Self::DecisionTree { tree, .. } => u8::from(tree.value(features) > 0.5),
            Self::RandomForest { model, .. } => model.predict(features),
            Self::GradientBoosting { model, .. } => model.predict(features),
        }
    }

    /// Probability of ON from the model's own output.
    #[must_use]
    pub fn predict_proba(&self, features: &[f64; N_FEATURES]) -> f64 {
        match self {
            Self::LogisticRegression { model, .. } => model.predict_proba(features),
            Self::DecisionTree { tree, .. } => tree.value(features),
            Self::RandomForest { model, .. } => model.predict_proba(features),
            Self::GradientBoosting { model, .. } => model.predict_proba(features),
        }
    }

    /// Members evaluated and deepest path per prediction.
    #[must_use]
    pub fn inference_cost(&self) -> InferenceCost {
        let deepest = |trees: &[TreeNode]| trees.iter().map(TreeNode::depth).max().unwrap_or(0);
        match self {
            Self::LogisticRegression { .. } => InferenceCost {
                members: 1,
                depth: 0,
            },
            Self::DecisionTree { tree, .. } => InferenceCost {
                members: 1,
                depth: tree.depth(),
            },
            Self::RandomForest { model, .. } => InferenceCost {
                members: model.trees().len(),
                depth: deepest(model.trees()),
            },
            Self::GradientBoosting { model, .. } => InferenceCost {
                members: model.trees().len(),
                depth: deepest(model.trees()),
            },
        }
    }
}

fn fit_tree(params: &TreeParams, dataset: &Dataset, seed: u64) -> TreeNode {
    let binner = binning::FeatureBinner::fit(dataset);
    let codes = binner.encode(dataset);
    let labels = dataset.labels();
    let objective = Classification {
        labels: &labels,
        criterion: params.criterion,
    };
    let grower = TreeGrower {
        binner: &binner,
        codes: &codes,
        objective: &objective,
        limits: GrowthLimits {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: N_FEATURES,
        },
    };
    grower.grow(
        (0..dataset.len()).collect(),
        &mut StdRng::seed_from_u64(seed),
    )
}
