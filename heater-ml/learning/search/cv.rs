use std::collections::BTreeMap;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::classical_ml::TrainingError;

/// One cross-validation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    /// Rows fitted on, ascending.
    pub train: Vec<usize>,
    /// Rows scored, ascending.
    pub validation: Vec<usize>,
}

/// Stratified k-fold splitter: each class is shuffled with the seed and dealt
/// round-robin over the folds, so every fold keeps the label ratio.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    folds: usize,
    seed: u64,
}

impl StratifiedKFold {
    /// Creates a splitter with `folds` rounds.
    #[must_use]
    pub const fn new(folds: usize, seed: u64) -> Self {
        Self { folds, seed }
    }

    /// Splits rows by their labels.
    pub fn split(&self, labels: &[u8]) -> Result<Vec<Fold>, TrainingError> {
        if self.folds < 2 {
            return Err(TrainingError::InvalidHyperParameters(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.folds
            )));
        }
        let mut by_class: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
        for (idx, &label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(idx);
        }
        match by_class.len() {
            0 => return Err(TrainingError::EmptyTrainingSet),
            1 => {
                let class = by_class.keys().next().copied().unwrap_or_default();
                return Err(TrainingError::SingleClass(class));
            }
            _ => {}
        }
        for (&class, members) in &by_class {
            if members.len() < self.folds {
                return Err(TrainingError::InsufficientClassMembers {
                    class,
                    count: members.len(),
                    folds: self.folds,
                });
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut assignment = vec![0usize; labels.len()];
        let mut dealt = 0usize;
        for members in by_class.values_mut() {
            members.shuffle(&mut rng);
            for &idx in members.iter() {
                assignment[idx] = dealt % self.folds;
                dealt += 1;
            }
        }

        Ok((0..self.folds)
            .map(|fold| {
                let (validation, train): (Vec<usize>, Vec<usize>) =
                    (0..labels.len()).partition(|&idx| assignment[idx] == fold);
                Fold { train, validation }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_partition_rows_and_keep_ratio() {
        let labels: Vec<u8> = (0..100).map(|i| u8::from(i % 4 == 0)).collect();
        let folds = StratifiedKFold::new(5, 42).split(&labels).unwrap();
        assert_eq!(folds.len(), 5);
        let mut seen = vec![0; labels.len()];
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.validation.len(), labels.len());
            let positives = fold.validation.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(positives, 5);
            for &idx in &fold.validation {
                seen[idx] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn rejects_class_smaller_than_fold_count() {
        let labels = [0, 0, 0, 0, 0, 1, 1];
        let err = StratifiedKFold::new(3, 1).split(&labels).unwrap_err();
        assert_eq!(
            err,
            TrainingError::InsufficientClassMembers {
                class: 1,
                count: 2,
                folds: 3
            }
        );
    }

    #[test]
    fn rejects_single_class() {
        let err = StratifiedKFold::new(2, 1).split(&[1, 1, 1]).unwrap_err();
        assert_eq!(err, TrainingError::SingleClass(1));
    }

    #[test]
    fn split_is_seeded() {
        let labels: Vec<u8> = (0..60).map(|i| u8::from(i % 3 == 0)).collect();
        let a = StratifiedKFold::new(3, 9).split(&labels).unwrap();
        let b = StratifiedKFold::new(3, 9).split(&labels).unwrap();
        assert_eq!(a, b);
    }
}
