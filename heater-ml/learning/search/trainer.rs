use std::cmp::Ordering;

use rayon::prelude::*;

use super::{cv::StratifiedKFold, grid::ModelSpec};
use crate::{
    classical_ml::{AlgorithmKind, HyperParameters, TrainedModel, TrainingError},
    dataset::Dataset,
    metrics::{ConfusionCounts, CvSummary, EvaluationResult},
};

/// Model fitted for one specification, with its held-out evaluation.
#[derive(Debug, Clone)]
pub struct TrainedCandidate {
    /// Model refitted on the full training subset.
    pub model: TrainedModel,
    /// Test metrics plus the winning point's cross-validation.
    pub evaluation: EvaluationResult,
    /// Grid points searched.
    pub grid_size: usize,
}

/// Result of one specification; failures are kept, not raised.
#[derive(Debug, Clone)]
pub struct SpecOutcome {
    /// Specification name.
    pub name: String,
    /// Algorithm family.
    pub kind: AlgorithmKind,
    /// Trained model or the reason it could not be trained.
    pub result: Result<TrainedCandidate, TrainingError>,
}

impl SpecOutcome {
    /// Whether training succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Grid search with stratified k-fold cross-validation.
#[derive(Debug, Clone, Copy)]
pub struct ModelTrainer {
    cv_folds: usize,
    seed: u64,
    parallel: bool,
}

struct ScoredPoint {
    params: HyperParameters,
    cv: CvSummary,
}

impl ModelTrainer {
    /// Creates a trainer; `parallel` evaluates grid points on the rayon pool.
    #[must_use]
    pub const fn new(cv_folds: usize, seed: u64, parallel: bool) -> Self {
        Self {
            cv_folds,
            seed,
            parallel,
        }
    }

    /// Trains every specification in declaration order.
    #[must_use]
    pub fn train_all(&self, specs: &[ModelSpec], train: &Dataset, test: &Dataset) -> Vec<SpecOutcome> {
        specs
            .iter()
            .map(|spec| self.train_spec(spec, train, test))
            .collect()
    }

    /// Searches one grid, refits the winner and scores it on `test`.
    #[must_use]
    pub fn train_spec(&self, spec: &ModelSpec, train: &Dataset, test: &Dataset) -> SpecOutcome {
        SpecOutcome {
            name: spec.name.clone(),
            kind: spec.algorithm.kind(),
            result: self.search(spec, train, test),
        }
    }

    fn search(
        &self,
        spec: &ModelSpec,
        train: &Dataset,
        test: &Dataset,
    ) -> Result<TrainedCandidate, TrainingError> {
        let grid = spec.algorithm.combinations();
        if grid.is_empty() {
            return Err(TrainingError::EmptyGrid);
        }
        for point in &grid {
            point
                .validate()
                .map_err(TrainingError::InvalidHyperParameters)?;
        }

        let folds = StratifiedKFold::new(self.cv_folds, self.seed).split(&train.labels())?;
        let fold_sets: Vec<(Dataset, Dataset)> = folds
            .iter()
            .map(|fold| (train.subset(&fold.train), train.subset(&fold.validation)))
            .collect();

        let score = |params: &HyperParameters| -> Result<ScoredPoint, TrainingError> {
            let mut fold_f1 = Vec::with_capacity(fold_sets.len());
            for (fit_set, validation_set) in &fold_sets {
                let model = TrainedModel::fit(params, fit_set, self.seed)?;
                fold_f1.push(f1_on(&model, validation_set));
            }
            Ok(ScoredPoint {
                params: *params,
                cv: CvSummary::from_scores(fold_f1),
            })
        };
        let scored: Vec<Result<ScoredPoint, TrainingError>> = if self.parallel {
            grid.par_iter().map(score).collect()
        } else {
            grid.iter().map(score).collect()
        };
        let scored = scored.into_iter().collect::<Result<Vec<_>, _>>()?;

        let best = pick_best(scored).ok_or(TrainingError::EmptyGrid)?;
        let model = TrainedModel::fit(&best.params, train, self.seed)?;
        let evaluation = evaluate(&model, test, best.cv);
        Ok(TrainedCandidate {
            model,
            evaluation,
            grid_size: grid.len(),
        })
    }
}

/// Highest mean F1, then lowest variance, then fewer effective parameters;
/// remaining ties keep the first declared point.
fn pick_best(scored: Vec<ScoredPoint>) -> Option<ScoredPoint> {
    let mut best: Option<ScoredPoint> = None;
    for point in scored {
        let better = match &best {
            None => true,
            Some(current) => {
                point
                    .cv
                    .mean_f1
                    .total_cmp(&current.cv.mean_f1)
                    .then_with(|| current.cv.variance.total_cmp(&point.cv.variance))
                    .then_with(|| {
                        current
                            .params
                            .effective_parameters()
                            .cmp(&point.params.effective_parameters())
                    })
                    == Ordering::Greater
            }
        };
        if better {
            best = Some(point);
        }
    }
    best
}

fn f1_on(model: &TrainedModel, dataset: &Dataset) -> f64 {
    let truth = dataset.labels();
    let predicted: Vec<u8> = dataset
        .samples()
        .iter()
        .map(|sample| model.predict(&sample.features))
        .collect();
    ConfusionCounts::from_labels(&truth, &predicted).f1()
}

/// Scores `model` on `dataset` using its own probability output for ROC-AUC.
#[must_use]
pub fn evaluate(model: &TrainedModel, dataset: &Dataset, cross_validation: CvSummary) -> EvaluationResult {
    let truth = dataset.labels();
    let (predicted, scores): (Vec<u8>, Vec<f64>) = dataset
        .samples()
        .iter()
        .map(|sample| {
            (
                model.predict(&sample.features),
                model.predict_proba(&sample.features),
            )
        })
        .unzip();
    EvaluationResult::from_predictions(&truth, &predicted, &scores, cross_validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::split::stratified_split,
        search::grid::{AlgorithmGrid, LogisticGrid, TreeGrid},
        classical_ml::Criterion,
    };

    fn data() -> (Dataset, Dataset) {
        let dataset = Dataset::synthetic(1_500, 77);
        let partition = stratified_split(&dataset, 0.2, 42).unwrap();
        (partition.train_set(&dataset), partition.test_set(&dataset))
    }

    fn tree_spec(depths: Vec<usize>) -> ModelSpec {
        ModelSpec::new(
            "tree",
            AlgorithmGrid::DecisionTree(TreeGrid {
                max_depth: depths,
                min_samples_split: vec![2],
                min_samples_leaf: vec![1],
                criterion: vec![Criterion::Gini],
            }),
        )
    }

    #[test]
    fn trains_and_evaluates_spec() {
        let (train, test) = data();
        let outcome = ModelTrainer::new(3, 42, false).train_spec(&tree_spec(vec![2, 6]), &train, &test);
        let candidate = outcome.result.unwrap();
        assert_eq!(candidate.grid_size, 2);
        assert_eq!(candidate.evaluation.cross_validation.folds, 3);
        assert!(candidate.evaluation.f1 > 0.9);
        assert_eq!(
            candidate.evaluation.confusion.total(),
            test.len()
        );
        assert!(candidate.evaluation.roc_auc.is_some());
    }

    #[test]
    fn invalid_combination_fails_only_that_spec() {
        let (train, test) = data();
        let specs = vec![
            ModelSpec::new(
                "bad_logistic",
                AlgorithmGrid::LogisticRegression(LogisticGrid {
                    c: vec![0.0, 1.0],
                    max_iter: vec![50],
                }),
            ),
            tree_spec(vec![4]),
        ];
        let outcomes = ModelTrainer::new(3, 42, true).train_all(&specs, &train, &test);
        assert!(matches!(
            outcomes[0].result,
            Err(TrainingError::InvalidHyperParameters(_))
        ));
        assert!(outcomes[1].succeeded());
    }

    #[test]
    fn empty_grid_fails() {
        let (train, test) = data();
        let outcome = ModelTrainer::new(3, 42, false).train_spec(&tree_spec(Vec::new()), &train, &test);
        assert_eq!(outcome.result.unwrap_err(), TrainingError::EmptyGrid);
    }

    #[test]
    fn parallel_and_sequential_search_agree() {
        let (train, test) = data();
        let spec = tree_spec(vec![1, 3, 5]);
        let a = ModelTrainer::new(3, 42, false).train_spec(&spec, &train, &test);
        let b = ModelTrainer::new(3, 42, true).train_spec(&spec, &train, &test);
        let (a, b) = (a.result.unwrap(), b.result.unwrap());
        assert_eq!(a.model, b.model);
        assert_eq!(a.evaluation, b.evaluation);
    }

    #[test]
    fn ties_prefer_lower_variance_then_smaller_models() {
        let point = |depth, mean, variance| ScoredPoint {
            params: tree_spec(vec![depth]).algorithm.combinations()[0],
            cv: CvSummary {
                folds: 2,
                fold_f1: Vec::new(),
                mean_f1: mean,
                variance,
            },
        };
        let best = pick_best(vec![point(8, 0.9, 0.02), point(6, 0.9, 0.01), point(4, 0.9, 0.01)]).unwrap();
        assert_eq!(best.params.effective_parameters(), 16);
        let best = pick_best(vec![point(3, 0.8, 0.0), point(9, 0.95, 0.05)]).unwrap();
        assert_eq!(best.params.effective_parameters(), 512);
    }
}
