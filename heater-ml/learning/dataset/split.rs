use std::collections::BTreeMap;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{loader::DatasetError, Dataset};

/// Disjoint train/test index lists into one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Training rows, ascending.
    pub train: Vec<usize>,
    /// Held-out test rows, ascending.
    pub test: Vec<usize>,
}

impl Partition {
    /// Materializes the training subset.
    #[must_use]
    pub fn train_set(&self, dataset: &Dataset) -> Dataset {
        dataset.subset(&self.train)
    }

    /// Materializes the test subset.
    #[must_use]
    pub fn test_set(&self, dataset: &Dataset) -> Dataset {
        dataset.subset(&self.test)
    }
}

/// Splits once per class so both subsets keep the label ratio (stratified
/// hold-out). The same seed and ratio always give the same partition.
pub fn stratified_split(
    dataset: &Dataset,
    test_ratio: f64,
    seed: u64,
) -> Result<Partition, DatasetError> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(DatasetError::Partition(format!(
            "test ratio must be in (0, 1), got {test_ratio}"
        )));
    }

    let mut by_class: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (idx, sample) in dataset.samples().iter().enumerate() {
        by_class.entry(sample.label).or_default().push(idx);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(dataset.len());
    let mut test = Vec::new();
    for indices in by_class.values_mut() {
        indices.shuffle(&mut rng);
        let n_test = (indices.len() as f64 * test_ratio).round() as usize;
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    if train.is_empty() || test.is_empty() {
        return Err(DatasetError::Partition(format!(
            "{} rows with test ratio {test_ratio} leave an empty subset",
            dataset.len()
        )));
    }
    Ok(Partition { train, test })
}
