use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    dataset::{FEATURE_NAMES, SENSOR_RANGES},
    quantize::{bins::QuantizationGrid, ExportConfig, Exporter},
    search::ModelSpec,
};

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("reading config {path}: {source}")]
    Io {
        /// Config path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// TOML syntax or schema error.
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    /// TOML encoding error.
    #[error("encoding config: {0}")]
    Encode(#[from] toml::ser::Error),
    /// Values outside their allowed domain.
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("data/readings.csv")
}

const fn default_test_ratio() -> f64 {
    0.2
}

const fn default_seed() -> u64 {
    42
}

const fn default_skew_threshold() -> f64 {
    0.6
}

const fn default_cv_folds() -> usize {
    5
}

const fn default_true() -> bool {
    true
}

/// Input data and partition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSection {
    /// Readings CSV.
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
    /// Held-out share in (0, 1).
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    /// Seed for the partition, folds and learners.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Majority share above which the dataset is flagged as skewed.
    #[serde(default = "default_skew_threshold")]
    pub skew_threshold: f64,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
            test_ratio: default_test_ratio(),
            seed: default_seed(),
            skew_threshold: default_skew_threshold(),
        }
    }
}

/// Grid search settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSection {
    /// Stratified folds, >= 2.
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    /// Evaluate grid points on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            cv_folds: default_cv_folds(),
            parallel: default_true(),
        }
    }
}

/// Complete pipeline configuration; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Data and partition.
    #[serde(default)]
    pub dataset: DatasetSection,
    /// Grid search.
    #[serde(default)]
    pub training: TrainingSection,
    /// Quantization bins.
    #[serde(default)]
    pub quantization: QuantizationGrid,
    /// Export settings.
    #[serde(default)]
    pub export: ExportConfig,
    /// Model specifications in declaration order.
    #[serde(default = "ModelSpec::defaults")]
    pub models: Vec<ModelSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetSection::default(),
            training: TrainingSection::default(),
            quantization: QuantizationGrid::default(),
            export: ExportConfig::default(),
            models: ModelSpec::defaults(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a TOML file; relative paths resolve against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.resolve_paths(&base);
        Ok(config)
    }

    /// Parses and validates TOML text without touching paths.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Makes relative paths absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.dataset.path.is_relative() {
            self.dataset.path = base.join(&self.dataset.path);
        }
        if self.export.out_dir.is_relative() {
            self.export.out_dir = base.join(&self.export.out_dir);
        }
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid(reason));
        let ratio = self.dataset.test_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return invalid(format!("dataset.test_ratio must be in (0, 1), got {ratio}"));
        }
        let skew = self.dataset.skew_threshold;
        if !(skew > 0.0 && skew < 1.0) {
            return invalid(format!(
                "dataset.skew_threshold must be in (0, 1), got {skew}"
            ));
        }
        if self.training.cv_folds < 2 {
            return invalid(format!(
                "training.cv_folds must be at least 2, got {}",
                self.training.cv_folds
            ));
        }

        for ((name, spec), range) in FEATURE_NAMES
            .iter()
            .zip(self.quantization.specs())
            .zip(SENSOR_RANGES)
        {
            if spec.min < range.min || spec.max > range.max {
                return invalid(format!(
                    "quantization.{name} range [{}, {}] exceeds sensor bounds [{}, {}]",
                    spec.min, spec.max, range.min, range.max
                ));
            }
        }
        Exporter::new(self.export.clone(), self.quantization)
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;

        if self.models.is_empty() {
            return invalid("at least one model specification is required".into());
        }
        let mut names = HashSet::new();
        for spec in &self.models {
            if spec.name.trim().is_empty() {
                return invalid("model names must not be empty".into());
            }
            if !names.insert(spec.name.as_str()) {
                return invalid(format!("duplicate model name {:?}", spec.name));
            }
        }
        Ok(())
    }
}
