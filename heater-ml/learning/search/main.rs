//! Hyperparameter grids, stratified cross-validation and the per-spec trainer.

/// Stratified k-fold splitting.
pub mod cv;
/// Typed hyperparameter grids and model specifications.
pub mod grid;
/// Grid search, refit and held-out evaluation.
pub mod trainer;

pub use cv::{Fold, StratifiedKFold};
pub use grid::{AlgorithmGrid, BoostingGrid, ForestGrid, LogisticGrid, ModelSpec, TreeGrid};
pub use trainer::{evaluate, ModelTrainer, SpecOutcome, TrainedCandidate};
