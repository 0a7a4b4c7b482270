use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    binning::FeatureBinner,
    tree::{Classification, GrowthLimits, TreeGrower, TreeNode},
    Criterion, ForestParams,
};
use crate::dataset::{Dataset, N_FEATURES};

/// Bagged classification trees combined by hard majority vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    trees: Vec<TreeNode>,
}

impl RandomForestModel {
    /// Fits `n_estimators` trees on bootstrap samples. Tree `i` draws from its
    /// own generator seeded with `seed + i`, so the result does not depend on
    /// scheduling.
    #[must_use]
    pub fn fit(params: &ForestParams, dataset: &Dataset, seed: u64) -> Self {
        let binner = FeatureBinner::fit(dataset);
        let codes = binner.encode(dataset);
        let labels = dataset.labels();
        let objective = Classification {
            labels: &labels,
            criterion: Criterion::Gini,
        };
        let grower = TreeGrower {
            binner: &binner,
            codes: &codes,
            objective: &objective,
            limits: GrowthLimits {
                max_depth: params.max_depth,
                min_samples_split: params.min_samples_split,
                min_samples_leaf: params.min_samples_leaf,
                max_features: params.max_features.resolve(N_FEATURES),
            },
        };
        let n = dataset.len();
        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|idx| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(idx as u64));
                let rows = (0..n).map(|_| rng.gen_range(0..n)).collect();
                grower.grow(rows, &mut rng)
            })
            .collect();
        Self { trees }
    }

    /// Member trees in fitting order.
    #[must_use]
    pub fn trees(&self) -> &[TreeNode] {
        &self.trees
    }

    /// Trees voting ON.
    #[must_use]
    pub fn votes(&self, features: &[f64; N_FEATURES]) -> usize {
        self.trees
            .iter()
            .filter(|tree| tree.value(features) > 0.5)
            .count()
    }

    /// Strict majority of ON votes; a tie is OFF.
    #[must_use]
    pub fn predict(&self, features: &[f64; N_FEATURES]) -> u8 {
        u8::from(2 * self.votes(features) > self.trees.len())
    }

    /// Share of trees voting ON.
    #[must_use]
    pub fn predict_proba(&self, features: &[f64; N_FEATURES]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.votes(features) as f64 / self.trees.len() as f64
    }
}
