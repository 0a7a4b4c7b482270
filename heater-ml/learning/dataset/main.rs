//! Sensor readings dataset: loading, validation, partitioning and analysis.

/// Descriptive statistics and correlations.
pub mod analysis;
/// CSV loader and validator.
pub mod loader;
/// Stratified train/test partitioning.
pub mod split;

use std::path::{Path, PathBuf};

use anyhow::Context;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Feature names in training order.
pub const FEATURE_NAMES: [&str; 3] = ["temperature", "humidity", "light"];

/// Column names expected in the CSV header, features first, label last.
pub const CSV_HEADER: [&str; 4] = ["Temp", "Humidity", "LDR", "Heater"];

/// Number of input features.
pub const N_FEATURES: usize = 3;

/// Documented measuring range of one sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorRange {
    /// Lowest value the sensor reports.
    pub min: f64,
    /// Highest value the sensor reports.
    pub max: f64,
}

impl SensorRange {
    /// Inclusive containment check; non-finite values are never contained.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Sensor bounds in feature order: temperature (°C), humidity (%), light (0-100).
pub const SENSOR_RANGES: [SensorRange; 3] = [
    SensorRange {
        min: -40.0,
        max: 85.0,
    },
    SensorRange {
        min: 0.0,
        max: 100.0,
    },
    SensorRange {
        min: 0.0,
        max: 100.0,
    },
];

/// One labelled reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Temperature, humidity and light, in [`FEATURE_NAMES`] order.
    pub features: [f64; N_FEATURES],
    /// Heater state: 0 = OFF, 1 = ON.
    pub label: u8,
}

impl Sample {
    /// Builds a sample from individual readings.
    #[must_use]
    pub const fn new(temperature: f64, humidity: f64, light: f64, label: u8) -> Self {
        Self {
            features: [temperature, humidity, light],
            label,
        }
    }

    /// Temperature in °C.
    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.features[0]
    }

    /// Relative humidity in %.
    #[must_use]
    pub const fn humidity(&self) -> f64 {
        self.features[1]
    }

    /// Light level on the 0-100 scale.
    #[must_use]
    pub const fn light(&self) -> f64 {
        self.features[2]
    }
}

/// Label counts of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassBalance {
    /// Samples labelled OFF (0).
    pub off: usize,
    /// Samples labelled ON (1).
    pub on: usize,
}

impl ClassBalance {
    /// Total number of samples.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.off + self.on
    }

    /// Share of the larger class, 0 for an empty dataset.
    #[must_use]
    pub fn majority_share(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.off.max(self.on) as f64 / self.total() as f64
    }

    /// Whether the majority class exceeds `threshold` of all samples.
    #[must_use]
    pub fn is_skewed(&self, threshold: f64) -> bool {
        self.majority_share() > threshold
    }
}

/// Ordered, read-only collection of samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    samples: Vec<Sample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
}

impl Dataset {
    /// Wraps samples that were validated elsewhere.
    #[must_use]
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            source: None,
        }
    }

    /// Records the file the samples were read from.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// File the samples were read from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// All samples in file order.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Labels in sample order.
    #[must_use]
    pub fn labels(&self) -> Vec<u8> {
        self.samples.iter().map(|sample| sample.label).collect()
    }

    /// Feature rows in sample order.
    #[must_use]
    pub fn features(&self) -> Vec<[f64; N_FEATURES]> {
        self.samples.iter().map(|sample| sample.features).collect()
    }

    /// Counts samples per label.
    #[must_use]
    pub fn class_balance(&self) -> ClassBalance {
        let on = self.samples.iter().filter(|sample| sample.label == 1).count();
        ClassBalance {
            off: self.samples.len() - on,
            on,
        }
    }

    /// Copies the samples at `indices`, in the given order.
    #[must_use]
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            samples: indices.iter().map(|&idx| self.samples[idx]).collect(),
            source: self.source.clone(),
        }
    }

    /// Dense `n × 4` matrix of features followed by the label column.
    #[must_use]
    pub fn to_matrix_with_label(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.samples.len(), N_FEATURES + 1), |(row, col)| {
            let sample = &self.samples[row];
            if col < N_FEATURES {
                sample.features[col]
            } else {
                f64::from(sample.label)
            }
        })
    }

    /// Generates readings following a simple brooder rule: heat when cold,
    /// or when cool and dark. Used by demos and tests.
    #[must_use]
    pub fn synthetic(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let samples = (0..count)
            .map(|_| {
                let temperature = round2(rng.gen_range(13.0..40.0));
                let humidity = round2(rng.gen_range(60.0..100.0));
                let light = round2(rng.gen_range(0.0..100.0));
                let heat = temperature < 24.0 || (temperature < 30.0 && light < 40.0);
                Sample::new(temperature, humidity, light, u8::from(heat))
            })
            .collect();
        Self::from_samples(samples)
    }

    /// Writes the dataset as CSV with the canonical header.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating dataset file {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        for sample in &self.samples {
            writer.write_record([
                sample.temperature().to_string(),
                sample.humidity().to_string(),
                sample.light().to_string(),
                sample.label.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
