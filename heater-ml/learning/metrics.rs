use serde::{Deserialize, Serialize};

/// Binary confusion-matrix counts, ON being the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// OFF predicted OFF.
    pub tn: usize,
    /// OFF predicted ON.
    pub fp: usize,
    /// ON predicted OFF.
    #[serde(rename = "fn")]
    pub fn_: usize,
    /// ON predicted ON.
    pub tp: usize,
}

impl ConfusionCounts {
    /// Tallies paired labels.
    #[must_use]
    pub fn from_labels(truth: &[u8], predicted: &[u8]) -> Self {
        let mut counts = Self::default();
        for (&actual, &guess) in truth.iter().zip(predicted) {
            match (actual, guess) {
                (1, 1) => counts.tp += 1,
                (1, _) => counts.fn_ += 1,
                (_, 1) => counts.fp += 1,
                _ => counts.tn += 1,
            }
        }
        counts
    }

    /// All counted samples.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    /// Share of correct predictions, 0 when empty.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// Precision of ON, 0 when nothing was predicted ON.
    #[must_use]
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Recall of ON, 0 when there are no ON samples.
    #[must_use]
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// F1 of ON, 0 when precision and recall are both 0.
    #[must_use]
    pub fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Cross-validation scores of the selected grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvSummary {
    /// Fold count.
    pub folds: usize,
    /// F1 per fold, in fold order.
    pub fold_f1: Vec<f64>,
    /// Mean fold F1.
    pub mean_f1: f64,
    /// Population variance of fold F1.
    pub variance: f64,
}

impl CvSummary {
    /// Summarizes per-fold scores.
    #[must_use]
    pub fn from_scores(fold_f1: Vec<f64>) -> Self {
        let folds = fold_f1.len();
        let mean_f1 = if folds == 0 {
            0.0
        } else {
            fold_f1.iter().sum::<f64>() / folds as f64
        };
        let variance = if folds == 0 {
            0.0
        } else {
            fold_f1.iter().map(|f| (f - mean_f1).powi(2)).sum::<f64>() / folds as f64
        };
        Self {
            folds,
            fold_f1,
            mean_f1,
            variance,
        }
    }
}

/// Test-set metrics of one trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Share of correct test predictions.
    pub accuracy: f64,
    /// Precision of ON.
    pub precision: f64,
    /// Recall of ON.
    pub recall: f64,
    /// F1 of ON.
    pub f1: f64,
    /// Area under the ROC curve; absent when the test set has one class.
    pub roc_auc: Option<f64>,
    /// Test confusion matrix.
    pub confusion: ConfusionCounts,
    /// Cross-validation of the selected grid point.
    pub cross_validation: CvSummary,
}

impl EvaluationResult {
    /// Builds the result from test labels, predictions and scores.
    #[must_use]
    pub fn from_predictions(
        truth: &[u8],
        predicted: &[u8],
        scores: &[f64],
        cross_validation: CvSummary,
    ) -> Self {
        let confusion = ConfusionCounts::from_labels(truth, predicted);
        Self {
            accuracy: confusion.accuracy(),
            precision: confusion.precision(),
            recall: confusion.recall(),
            f1: confusion.f1(),
            roc_auc: roc_auc(truth, scores),
            confusion,
            cross_validation,
        }
    }
}

/// Rank-based ROC-AUC (Mann-Whitney U) with averaged ranks for ties.
/// `None` unless both classes are present.
#[must_use]
pub fn roc_auc(truth: &[u8], scores: &[f64]) -> Option<f64> {
    let positives = truth.iter().filter(|&&label| label == 1).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 || scores.len() != truth.len() {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]].total_cmp(&scores[order[start]]).is_eq() {
            end += 1;
        }
        // Ranks are 1-based; a tie group shares the mean of its ranks.
        let average_rank = (start + end + 1) as f64 / 2.0;
        let tied_positives = order[start..end]
            .iter()
            .filter(|&&idx| truth[idx] == 1)
            .count();
        positive_rank_sum += average_rank * tied_positives as f64;
        start = end;
    }
    let p = positives as f64;
    let u = positive_rank_sum - p * (p + 1.0) / 2.0;
    Some(u / (p * negatives as f64))
}
