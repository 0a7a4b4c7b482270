use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, N_FEATURES};

/// Most candidate thresholds kept per feature, so codes fit in a `u8`.
pub const MAX_THRESHOLDS: usize = 255;

/// Per-feature candidate split thresholds learned from training data.
///
/// A value is encoded as the number of thresholds strictly below it, so for
/// the `k`-th threshold `x <= t_k` holds exactly when `code(x) <= k`. Trees
/// search splits on the codes and store the real threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBinner {
    thresholds: [Vec<f64>; N_FEATURES],
}

impl FeatureBinner {
    /// Learns thresholds from every row of `dataset`.
    #[must_use]
    pub fn fit(dataset: &Dataset) -> Self {
        let thresholds = std::array::from_fn(|feature| {
            let mut values: Vec<f64> = dataset
                .samples()
                .iter()
                .map(|sample| sample.features[feature])
                .collect();
            values.sort_by(f64::total_cmp);
            values.dedup();
            candidate_thresholds(&values)
        });
        Self { thresholds }
    }

    /// Sorted thresholds of one feature.
    #[must_use]
    pub fn thresholds(&self, feature: usize) -> &[f64] {
        &self.thresholds[feature]
    }

    /// Code of `value` for `feature`.
    #[must_use]
    pub fn code(&self, feature: usize, value: f64) -> u8 {
        let below = self.thresholds[feature].partition_point(|threshold| *threshold < value);
        u8::try_from(below).unwrap_or(u8::MAX)
    }

    /// Encodes every row of `dataset`.
    #[must_use]
    pub fn encode(&self, dataset: &Dataset) -> Vec<[u8; N_FEATURES]> {
        dataset
            .samples()
            .iter()
            .map(|sample| std::array::from_fn(|feature| self.code(feature, sample.features[feature])))
            .collect()
    }
}

fn candidate_thresholds(unique: &[f64]) -> Vec<f64> {
    if unique.len() < 2 {
        return Vec::new();
    }
    if unique.len() <= MAX_THRESHOLDS + 1 {
        return unique
            .windows(2)
            .map(|pair| midpoint(pair[0], pair[1]))
            .collect();
    }
    // Quantile cut points between neighbouring unique values.
    let mut thresholds: Vec<f64> = (1..=MAX_THRESHOLDS)
        .map(|q| {
            let idx = (q * unique.len() / (MAX_THRESHOLDS + 1)).clamp(1, unique.len() - 1);
            midpoint(unique[idx - 1], unique[idx])
        })
        .collect();
    thresholds.dedup();
    thresholds
}

/// Midpoint of `a < b` that still separates them.
fn midpoint(a: f64, b: f64) -> f64 {
    let mid = a + (b - a) / 2.0;
    if mid >= b {
        a
    } else {
        mid
    }
}
