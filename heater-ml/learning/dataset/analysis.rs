use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

use super::{Dataset, FEATURE_NAMES, N_FEATURES};

/// Name of the label column in analysis output.
pub const LABEL_NAME: &str = "heater";

/// Summary statistics of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    /// Column name.
    pub name: String,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation (n − 1).
    pub std: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
}

/// Descriptive view of a dataset. Feeds reports only, never training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAnalysis {
    /// Rows analysed.
    pub rows: usize,
    /// Features in training order, then the label.
    pub columns: Vec<ColumnSummary>,
    /// Pearson correlations, `correlation[i][j]` for `columns[i]`/`columns[j]`.
    /// `None` where a column has zero variance.
    pub correlation: Vec<Vec<Option<f64>>>,
}

impl FeatureAnalysis {
    /// Correlation of a feature with the label.
    #[must_use]
    pub fn label_correlation(&self, feature: usize) -> Option<f64> {
        self.correlation
            .get(feature)
            .and_then(|row| row.get(N_FEATURES).copied().flatten())
    }

    /// Features ordered by correlation with the label, strongest positive first.
    #[must_use]
    pub fn ranked_by_label_correlation(&self) -> Vec<(&str, Option<f64>)> {
        let mut ranked: Vec<_> = (0..N_FEATURES)
            .map(|idx| (self.columns[idx].name.as_str(), self.label_correlation(idx)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&a.1.unwrap_or(f64::NEG_INFINITY))
        });
        ranked
    }
}

/// Computes per-column statistics and the correlation matrix.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureAnalyzer;

impl FeatureAnalyzer {
    /// Analyses features and label together.
    #[must_use]
    pub fn analyze(&self, dataset: &Dataset) -> FeatureAnalysis {
        let names: Vec<&str> = FEATURE_NAMES
            .iter()
            .copied()
            .chain(std::iter::once(LABEL_NAME))
            .collect();
        let width = names.len();
        let rows = dataset.len();
        if rows == 0 {
            return FeatureAnalysis {
                rows,
                columns: names
                    .iter()
                    .map(|name| ColumnSummary {
                        name: (*name).to_string(),
                        mean: 0.0,
                        std: 0.0,
                        min: 0.0,
                        max: 0.0,
                    })
                    .collect(),
                correlation: vec![vec![None; width]; width],
            };
        }

        let matrix = dataset.to_matrix_with_label();
        let means = matrix
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(width));
        let stds = if rows > 1 {
            matrix.std_axis(Axis(0), 1.0)
        } else {
            Array1::zeros(width)
        };

        let columns = names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let column = matrix.column(idx);
                ColumnSummary {
                    name: (*name).to_string(),
                    mean: means[idx],
                    std: stds[idx],
                    min: column.iter().copied().fold(f64::INFINITY, f64::min),
                    max: column.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect();

        let centered = &matrix - &means;
        let scatter = centered.t().dot(&centered);
        let correlation = (0..width)
            .map(|i| {
                (0..width)
                    .map(|j| {
                        let denom = (scatter[[i, i]] * scatter[[j, j]]).sqrt();
                        if denom > 0.0 {
                            Some((scatter[[i, j]] / denom).clamp(-1.0, 1.0))
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        FeatureAnalysis {
            rows,
            columns,
            correlation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Sample;

    #[test]
    fn summarizes_columns() {
        let dataset = Dataset::from_samples(vec![
            Sample::new(20.0, 70.0, 10.0, 1),
            Sample::new(30.0, 80.0, 30.0, 0),
            Sample::new(25.0, 90.0, 20.0, 1),
        ]);
        let analysis = FeatureAnalyzer.analyze(&dataset);
        let temp = &analysis.columns[0];
        assert_eq!(temp.name, "temperature");
        assert!((temp.mean - 25.0).abs() < 1e-12);
        assert!((temp.std - 5.0).abs() < 1e-12);
        assert!((temp.min - 20.0).abs() < f64::EPSILON);
        assert!((temp.max - 30.0).abs() < f64::EPSILON);
        assert_eq!(analysis.columns[3].name, LABEL_NAME);
    }

    #[test]
    fn correlation_matrix_is_symmetric_with_unit_diagonal() {
        let dataset = Dataset::synthetic(500, 11);
        let analysis = FeatureAnalyzer.analyze(&dataset);
        for i in 0..4 {
            assert!((analysis.correlation[i][i].unwrap() - 1.0).abs() < 1e-9);
            for j in 0..4 {
                let a = analysis.correlation[i][j].unwrap();
                let b = analysis.correlation[j][i].unwrap();
                assert!((a - b).abs() < 1e-12);
            }
        }
        // Heating follows cold readings.
        assert!(analysis.label_correlation(0).unwrap() < -0.5);
        assert_eq!(analysis.ranked_by_label_correlation().last().unwrap().0, "temperature");
    }

    #[test]
    fn zero_variance_column_has_undefined_correlation() {
        let dataset = Dataset::from_samples(vec![
            Sample::new(20.0, 70.0, 10.0, 1),
            Sample::new(30.0, 70.0, 30.0, 0),
        ]);
        let analysis = FeatureAnalyzer.analyze(&dataset);
        assert_eq!(analysis.correlation[1][0], None);
        assert!((analysis.columns[1].std).abs() < f64::EPSILON);
        assert!(analysis.correlation[0][2].is_some());
    }
}
