use std::cmp::Ordering;

use thiserror::Error;

use crate::search::{SpecOutcome, TrainedCandidate};

/// Selection failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Every specification failed to train.
    #[error("no viable model: all {0} specifications failed")]
    NoViableModel(usize),
}

/// Winning specification.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// Position in declaration order.
    pub index: usize,
    /// Specification name.
    pub name: &'a str,
    /// Trained model and metrics.
    pub candidate: &'a TrainedCandidate,
}

/// Ranks trained specifications: test F1, then ROC-AUC (absent lowest), then
/// lower inference cost, then declaration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelSelector;

impl ModelSelector {
    /// Picks the best succeeded specification.
    pub fn select<'a>(&self, outcomes: &'a [SpecOutcome]) -> Result<Selection<'a>, SelectionError> {
        let mut best: Option<Selection<'a>> = None;
        for (index, outcome) in outcomes.iter().enumerate() {
            let Ok(candidate) = &outcome.result else {
                continue;
            };
            let challenger = Selection {
                index,
                name: &outcome.name,
                candidate,
            };
            best = match best {
                Some(current) if rank(candidate, current.candidate) != Ordering::Greater => {
                    Some(current)
                }
                _ => Some(challenger),
            };
        }
        best.ok_or(SelectionError::NoViableModel(outcomes.len()))
    }
}

/// `Greater` when `a` beats `b`.
fn rank(a: &TrainedCandidate, b: &TrainedCandidate) -> Ordering {
    let auc = |c: &TrainedCandidate| c.evaluation.roc_auc.unwrap_or(f64::NEG_INFINITY);
    a.evaluation
        .f1
        .total_cmp(&b.evaluation.f1)
        .then_with(|| auc(a).total_cmp(&auc(b)))
        .then_with(|| b.model.inference_cost().cmp(&a.model.inference_cost()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classical_ml::{AlgorithmKind, HyperParameters, TrainedModel, TrainingError},
        dataset::Dataset,
        metrics::CvSummary,
        search::evaluate,
    };

    fn candidate(params: &str, f1: f64, roc_auc: Option<f64>) -> TrainedCandidate {
        let params: HyperParameters = serde_json::from_str(params).unwrap();
        let train = Dataset::synthetic(300, 1);
        let model = TrainedModel::fit(&params, &train, 1).unwrap();
        let mut evaluation = evaluate(&model, &train, CvSummary::from_scores(vec![f1]));
        evaluation.f1 = f1;
        evaluation.roc_auc = roc_auc;
        TrainedCandidate {
            model,
            evaluation,
            grid_size: 1,
        }
    }

    fn outcome(name: &str, result: Result<TrainedCandidate, TrainingError>) -> SpecOutcome {
        SpecOutcome {
            name: name.into(),
            kind: AlgorithmKind::DecisionTree,
            result,
        }
    }

    const SHALLOW: &str = r#"{"kind":"decision_tree","max_depth":1,"min_samples_split":2,"min_samples_leaf":1,"criterion":"gini"}"#;
    const FOREST: &str = r#"{"kind":"random_forest","n_estimators":5,"max_depth":3,"min_samples_split":2,"min_samples_leaf":1,"max_features":"sqrt"}"#;

    #[test]
    fn highest_f1_wins() {
        let outcomes = vec![
            outcome("a", Ok(candidate(SHALLOW, 0.8, Some(0.9)))),
            outcome("b", Ok(candidate(SHALLOW, 0.85, None))),
        ];
        assert_eq!(ModelSelector.select(&outcomes).unwrap().name, "b");
    }

    #[test]
    fn roc_auc_breaks_ties_and_absent_ranks_lowest() {
        let outcomes = vec![
            outcome("none", Ok(candidate(SHALLOW, 0.8, None))),
            outcome("some", Ok(candidate(SHALLOW, 0.8, Some(0.6)))),
        ];
        assert_eq!(ModelSelector.select(&outcomes).unwrap().name, "some");
    }

    #[test]
    fn cheaper_model_then_declaration_order() {
        let outcomes = vec![
            outcome("forest", Ok(candidate(FOREST, 0.8, Some(0.9)))),
            outcome("tree", Ok(candidate(SHALLOW, 0.8, Some(0.9)))),
            outcome("tree_again", Ok(candidate(SHALLOW, 0.8, Some(0.9)))),
        ];
        let selection = ModelSelector.select(&outcomes).unwrap();
        assert_eq!(selection.name, "tree");
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn failed_specs_are_skipped_and_all_failed_is_an_error() {
        let outcomes = vec![
            outcome("broken", Err(TrainingError::EmptyGrid)),
            outcome("ok", Ok(candidate(SHALLOW, 0.1, None))),
        ];
        assert_eq!(ModelSelector.select(&outcomes).unwrap().name, "ok");
        let failed = vec![outcome("broken", Err(TrainingError::EmptyGrid))];
        assert_eq!(
            ModelSelector.select(&failed).unwrap_err(),
            SelectionError::NoViableModel(1)
        );
    }
}
