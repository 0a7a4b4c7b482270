use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::{boosting::sigmoid, LogisticParams, TrainingError};
use crate::dataset::{Dataset, N_FEATURES};

/// Newton steps smaller than this end the fit.
const TOLERANCE: f64 = 1e-8;
/// Pivots smaller than this make the Newton system singular.
const MIN_PIVOT: f64 = 1e-300;

/// Per-feature standardization fitted on training data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Feature means.
    pub mean: [f64; N_FEATURES],
    /// Population standard deviations; a constant feature keeps scale 1.
    pub scale: [f64; N_FEATURES],
}

impl StandardScaler {
    /// Fits means and scales on `dataset`.
    #[must_use]
    pub fn fit(dataset: &Dataset) -> Self {
        let n = dataset.len().max(1) as f64;
        let mut mean = [0.0; N_FEATURES];
        for sample in dataset.samples() {
            for (acc, value) in mean.iter_mut().zip(sample.features) {
                *acc += value;
            }
        }
        for value in &mut mean {
            *value /= n;
        }
        let mut variance = [0.0; N_FEATURES];
        for sample in dataset.samples() {
            for ((acc, value), mu) in variance.iter_mut().zip(sample.features).zip(mean) {
                *acc += (value - mu).powi(2);
            }
        }
        let scale = variance.map(|v| {
            let std = (v / n).sqrt();
            if std > 0.0 {
                std
            } else {
                1.0
            }
        });
        Self { mean, scale }
    }

    /// Standardized copy of `features`.
    #[must_use]
    pub fn transform(&self, features: &[f64; N_FEATURES]) -> [f64; N_FEATURES] {
        std::array::from_fn(|idx| (features[idx] - self.mean[idx]) / self.scale[idx])
    }
}

/// L2-regularized logistic regression on standardized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    scaler: StandardScaler,
    weights: [f64; N_FEATURES],
    bias: f64,
    iterations: usize,
}

impl LogisticModel {
    /// Minimizes `0.5·‖w‖² + C·Σ logloss` with Newton iterations. The bias is
    /// not penalized.
    pub fn fit(params: &LogisticParams, dataset: &Dataset) -> Result<Self, TrainingError> {
        let scaler = StandardScaler::fit(dataset);
        let n = dataset.len();
        let width = N_FEATURES + 1;
        let design = Array2::from_shape_fn((n, width), |(row, col)| {
            if col < N_FEATURES {
                scaler.transform(&dataset.samples()[row].features)[col]
            } else {
                1.0
            }
        });
        let targets = Array1::from_iter(dataset.samples().iter().map(|s| f64::from(s.label)));
        let mut penalty = Array1::<f64>::ones(width);
        penalty[N_FEATURES] = 0.0;

        let mut theta = Array1::<f64>::zeros(width);
        let mut iterations = 0;
        while iterations < params.max_iter {
            iterations += 1;
            let probabilities = design.dot(&theta).mapv(sigmoid);
            let gradient =
                design.t().dot(&(&probabilities - &targets)) * params.c + &penalty * &theta;
            let curvature = probabilities.mapv(|p| p * (1.0 - p)) * params.c;
            let weighted = &design * &curvature.insert_axis(Axis(1));
            let mut hessian = design.t().dot(&weighted);
            for idx in 0..width {
                hessian[[idx, idx]] += penalty[idx];
            }
            let step = solve(hessian, gradient)?;
            theta -= &step;
            if step.iter().all(|delta| delta.abs() < TOLERANCE) {
                break;
            }
        }
        if theta.iter().any(|value| !value.is_finite()) {
            return Err(TrainingError::Numerical(
                "logistic regression diverged".into(),
            ));
        }

        Ok(Self {
            scaler,
            weights: [theta[0], theta[1], theta[2]],
            bias: theta[N_FEATURES],
            iterations,
        })
    }

    /// Fitted scaler.
    #[must_use]
    pub const fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Coefficients on standardized features.
    #[must_use]
    pub const fn weights(&self) -> [f64; N_FEATURES] {
        self.weights
    }

    /// Intercept on standardized features.
    #[must_use]
    pub const fn bias(&self) -> f64 {
        self.bias
    }

    /// Newton iterations performed.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Linear score `w·z + b` with `z` standardized.
    #[must_use]
    pub fn decision(&self, features: &[f64; N_FEATURES]) -> f64 {
        let z = self.scaler.transform(features);
        self.bias
            + z.iter()
                .zip(self.weights)
                .map(|(value, weight)| value * weight)
                .sum::<f64>()
    }

    /// ON when the score is positive.
    #[must_use]
    pub fn predict(&self, features: &[f64; N_FEATURES]) -> u8 {
        u8::from(self.decision(features) > 0.0)
    }

    /// Sigmoid of the score.
    #[must_use]
    pub fn predict_proba(&self, features: &[f64; N_FEATURES]) -> f64 {
        sigmoid(self.decision(features))
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, TrainingError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| a[[x, col]].abs().total_cmp(&a[[y, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < MIN_PIVOT || !a[[pivot, col]].is_finite() {
            return Err(TrainingError::Numerical(
                "singular Newton system in logistic regression".into(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Sample;

    #[test]
    fn scaler_uses_population_std_and_guards_constant_features() {
        let dataset = Dataset::from_samples(vec![
            Sample::new(10.0, 50.0, 0.0, 0),
            Sample::new(20.0, 50.0, 4.0, 1),
        ]);
        let scaler = StandardScaler::fit(&dataset);
        assert!((scaler.mean[0] - 15.0).abs() < 1e-12);
        assert!((scaler.scale[0] - 5.0).abs() < 1e-12);
        assert!((scaler.scale[1] - 1.0).abs() < f64::EPSILON);
        assert_eq!(scaler.transform(&[20.0, 50.0, 4.0]), [1.0, 0.0, 1.0]);
    }

    #[test]
    fn solver_handles_small_system() {
        let a = Array2::from_shape_vec((2, 2), vec![0.0, 2.0, 3.0, 1.0]).unwrap();
        let b = Array1::from(vec![4.0, 5.0]);
        let x = solve(a, b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn logistic_regression_learns_temperature_trend() {
        let train = Dataset::synthetic(2_000, 12);
        let model = LogisticModel::fit(
            &LogisticParams {
                c: 1.0,
                max_iter: 100,
            },
            &train,
        )
        .unwrap();
        assert!(model.iterations() < 100);
        assert!(model.weights()[0] < 0.0);
        assert_eq!(model.predict(&[14.0, 70.0, 20.0]), 1);
        assert_eq!(model.predict(&[39.0, 70.0, 90.0]), 0);
        let p = model.predict_proba(&[14.0, 70.0, 20.0]);
        assert!(p > 0.5 && p < 1.0);
    }
}
