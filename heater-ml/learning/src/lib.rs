#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Heater ON/OFF classifier pipeline: dataset validation, grid-searched
//! classical models, selection, and lookup-table / fixed-point C export.

/// Sensor readings, loading and partitioning.
#[path = "../dataset/main.rs"]
pub mod dataset;

/// Classifiers and their hyperparameters.
#[path = "../ML/main.rs"]
pub mod classical_ml;

/// Grid search with stratified cross-validation.
#[path = "../search/main.rs"]
pub mod search;

/// Classification metrics.
#[path = "../metrics.rs"]
pub mod metrics;

/// Model ranking.
#[path = "../selector.rs"]
pub mod selector;

/// Lookup table and fixed-point C export.
#[path = "../quantize/main.rs"]
pub mod quantize;

/// JSON and text run reports.
#[path = "../reporter.rs"]
pub mod reporter;

/// TOML pipeline configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Stage orchestration entry point.
#[path = "../main.rs"]
pub mod orchestration;

pub use classical_ml::{AlgorithmKind, HyperParameters, TrainedModel, TrainingError};
pub use config::{ConfigError, PipelineConfig};
pub use dataset::{
    analysis::{FeatureAnalysis, FeatureAnalyzer},
    loader::{DatasetError, DatasetLoader, LoadedDataset},
    Dataset, Sample,
};
pub use metrics::EvaluationResult;
pub use orchestration::{HeaterPipeline, PipelineRun};
pub use quantize::{lookup::LookupTable, ExportConfig, ExportError, ExportStrategy, Exporter};
pub use reporter::{PipelineReport, ReportWriter};
pub use search::{ModelSpec, ModelTrainer};
pub use selector::{ModelSelector, SelectionError};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
