//! Batch pipeline: load, analyze, partition, train, select, export, report.

use anyhow::Context;
use heater_logging::LogLevel;
use serde_json::json;

use crate::{
    classical_ml::TrainedModel,
    config::PipelineConfig,
    dataset::{
        analysis::FeatureAnalyzer,
        loader::{DatasetLoader, LoadedDataset},
        split::{stratified_split, Partition},
    },
    quantize::Exporter,
    reporter::{DatasetProvenance, PipelineReport, ReportPaths, ReportWriter},
    search::{ModelTrainer, SpecOutcome},
    selector::ModelSelector,
    telemetry::PipelineTelemetry,
};

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Report as written to disk.
    pub report: PipelineReport,
    /// Report file locations.
    pub report_paths: ReportPaths,
    /// Name of the exported specification.
    pub selected: String,
    /// Exported model.
    pub model: TrainedModel,
    /// Train/test partition used for every specification.
    pub partition: Partition,
}

/// Runs every stage of one configuration in sequence.
#[derive(Debug, Clone)]
pub struct HeaterPipeline {
    config: PipelineConfig,
}

impl HeaterPipeline {
    /// Creates a pipeline from a validated configuration.
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Loads the configured dataset and runs the remaining stages.
    pub fn run(&self, telemetry: Option<&PipelineTelemetry>) -> anyhow::Result<PipelineRun> {
        self.config.validate().context("validating configuration")?;
        let path = &self.config.dataset.path;
        log(
            telemetry,
            LogLevel::Info,
            "load.started",
            json!({ "path": path.display().to_string() }),
        );
        let loaded = DatasetLoader::new(self.config.dataset.skew_threshold)
            .load(path)
            .with_context(|| format!("loading dataset {}", path.display()));
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                log(
                    telemetry,
                    LogLevel::Error,
                    "load.failed",
                    json!({ "error": format!("{err:#}") }),
                );
                return Err(err);
            }
        };
        self.execute(&loaded, telemetry)
    }

    /// Runs analysis through reporting on an already validated dataset.
    pub fn run_loaded(
        &self,
        loaded: &LoadedDataset,
        telemetry: Option<&PipelineTelemetry>,
    ) -> anyhow::Result<PipelineRun> {
        self.config.validate().context("validating configuration")?;
        self.execute(loaded, telemetry)
    }

    #[allow(clippy::too_many_lines)]
    fn execute(
        &self,
        loaded: &LoadedDataset,
        telemetry: Option<&PipelineTelemetry>,
    ) -> anyhow::Result<PipelineRun> {
        let LoadedDataset { dataset, summary } = loaded;
        let summary = *summary;
        let settings = &self.config.dataset;
        log(
            telemetry,
            LogLevel::Info,
            "load.completed",
            json!({
                "rows": summary.rows,
                "off": summary.balance.off,
                "on": summary.balance.on,
                "duplicates": summary.duplicates,
            }),
        );
        if summary.skewed {
            log(
                telemetry,
                LogLevel::Warn,
                "load.class_imbalance",
                json!({
                    "majority_share": summary.balance.majority_share(),
                    "threshold": settings.skew_threshold,
                }),
            );
        }
        stage_event(telemetry, "load", json!({ "rows": summary.rows }));

        let analysis = FeatureAnalyzer.analyze(dataset);
        log(
            telemetry,
            LogLevel::Debug,
            "analyze.completed",
            json!({ "ranked": analysis.ranked_by_label_correlation() }),
        );
        stage_event(telemetry, "analyze", json!({ "columns": analysis.columns.len() }));

        let partition = stratified_split(dataset, settings.test_ratio, settings.seed)
            .context("partitioning dataset")?;
        let train = partition.train_set(dataset);
        let test = partition.test_set(dataset);
        log(
            telemetry,
            LogLevel::Info,
            "split.completed",
            json!({ "train": train.len(), "test": test.len(), "seed": settings.seed }),
        );
        stage_event(
            telemetry,
            "split",
            json!({ "train": train.len(), "test": test.len() }),
        );

        let training = &self.config.training;
        let trainer = ModelTrainer::new(training.cv_folds, settings.seed, training.parallel);
        let outcomes: Vec<SpecOutcome> = self
            .config
            .models
            .iter()
            .map(|spec| {
                log(
                    telemetry,
                    LogLevel::Debug,
                    "train.spec_started",
                    json!({ "spec": spec.name, "grid": spec.algorithm.combinations().len() }),
                );
                let outcome = trainer.train_spec(spec, &train, &test);
                record_outcome(telemetry, &outcome);
                outcome
            })
            .collect();
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        stage_event(
            telemetry,
            "train",
            json!({ "specifications": outcomes.len(), "succeeded": succeeded }),
        );

        let provenance = DatasetProvenance {
            source: dataset.source().map(std::path::Path::to_path_buf),
            rows: dataset.len(),
            train_rows: partition.train.len(),
            test_rows: partition.test.len(),
            test_ratio: settings.test_ratio,
            seed: settings.seed,
            balance: summary.balance,
            skewed: summary.skewed,
            duplicates: summary.duplicates,
        };
        let mut report = PipelineReport::new(provenance, analysis, &outcomes);
        let writer = ReportWriter::new(&self.config.export.out_dir);
        let exporter = Exporter::new(self.config.export.clone(), self.config.quantization);

        let selection = match ModelSelector.select(&outcomes) {
            Ok(selection) => selection,
            Err(err) => {
                log(
                    telemetry,
                    LogLevel::Error,
                    "select.failed",
                    json!({ "error": err.to_string() }),
                );
                clear_artifacts(&exporter, telemetry);
                writer
                    .write(&report)
                    .context("writing report after selection failure")?;
                return Err(err).context("selecting model");
            }
        };
        log(
            telemetry,
            LogLevel::Info,
            "select.completed",
            json!({
                "selected": selection.name,
                "kind": selection.candidate.model.kind(),
                "f1": selection.candidate.evaluation.f1,
                "roc_auc": selection.candidate.evaluation.roc_auc,
            }),
        );
        stage_event(telemetry, "select", json!({ "selected": selection.name }));
        report.selected_model = Some(selection.name.to_string());

        let export = match exporter.export(selection.name, &selection.candidate.model) {
            Ok(export) => export,
            Err(err) => {
                log(
                    telemetry,
                    LogLevel::Error,
                    "export.failed",
                    json!({ "error": err.to_string() }),
                );
                clear_artifacts(&exporter, telemetry);
                report.export_error = Some(err.to_string());
                writer
                    .write(&report)
                    .context("writing report after export failure")?;
                return Err(err).with_context(|| format!("exporting {}", selection.name));
            }
        };
        if let Some(reason) = &export.fallback {
            log(
                telemetry,
                LogLevel::Warn,
                "export.fallback",
                json!({ "requested": export.requested, "reason": reason }),
            );
        }
        log(
            telemetry,
            LogLevel::Info,
            "export.completed",
            json!({
                "strategy": export.strategy,
                "checked": export.verification.checked,
                "mismatches": export.verification.mismatches,
                "table_entries": export.table_entries,
            }),
        );
        stage_event(
            telemetry,
            "export",
            json!({ "strategy": export.strategy, "fallback": export.fallback }),
        );
        report.export = Some(export);

        let report_paths = writer.write(&report)?;
        log(
            telemetry,
            LogLevel::Info,
            "report.completed",
            json!({ "json": report_paths.json.display().to_string() }),
        );
        stage_event(
            telemetry,
            "report",
            json!({ "json": report_paths.json.display().to_string() }),
        );

        Ok(PipelineRun {
            selected: selection.name.to_string(),
            model: selection.candidate.model.clone(),
            report,
            report_paths,
            partition,
        })
    }
}

fn record_outcome(telemetry: Option<&PipelineTelemetry>, outcome: &SpecOutcome) {
    match &outcome.result {
        Ok(candidate) => log(
            telemetry,
            LogLevel::Info,
            "train.spec_completed",
            json!({
                "spec": outcome.name,
                "kind": outcome.kind,
                "hyperparameters": candidate.model.hyperparameters(),
                "f1": candidate.evaluation.f1,
                "cv_mean_f1": candidate.evaluation.cross_validation.mean_f1,
            }),
        ),
        Err(err) => {
            log(
                telemetry,
                LogLevel::Warn,
                "train.spec_failed",
                json!({ "spec": outcome.name, "error": err.to_string() }),
            );
            if let Some(telemetry) = telemetry {
                let _ = telemetry.event(
                    "pipeline.spec.failed",
                    json!({ "spec": outcome.name, "kind": outcome.kind, "error": err.to_string() }),
                );
            }
        }
    }
}

/// Removes artifacts of an earlier run so the directory never holds a model
/// the current report does not describe.
fn clear_artifacts(exporter: &Exporter, telemetry: Option<&PipelineTelemetry>) {
    match exporter.clear() {
        Ok(removed) if !removed.is_empty() => log(
            telemetry,
            LogLevel::Warn,
            "export.cleared",
            json!({
                "removed": removed
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>(),
            }),
        ),
        Ok(_) => {}
        Err(err) => log(
            telemetry,
            LogLevel::Error,
            "export.clear_failed",
            json!({ "error": err.to_string() }),
        ),
    }
}

fn stage_event(telemetry: Option<&PipelineTelemetry>, stage: &str, payload: serde_json::Value) {
    if let Some(telemetry) = telemetry {
        let _ = telemetry.event(&format!("pipeline.{stage}.completed"), payload);
    }
}

fn log(
    telemetry: Option<&PipelineTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: serde_json::Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use heater_events::MemoryEventBus;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        classical_ml::{AlgorithmKind, MaxFeatures},
        config::{ConfigError, DatasetSection, TrainingSection},
        dataset::Dataset,
        dataset::loader::DatasetLoader,
        quantize::{lookup::LookupTable, HEADER_FILE, LOOKUP_TABLE_FILE, SOURCE_FILE},
        reporter::SpecStatus,
        search::{AlgorithmGrid, BoostingGrid, ForestGrid, LogisticGrid, ModelSpec},
        selector::SelectionError,
    };

    fn config(data: &Path, out_dir: &Path, models: Vec<ModelSpec>) -> PipelineConfig {
        PipelineConfig {
            dataset: DatasetSection {
                path: data.to_path_buf(),
                ..DatasetSection::default()
            },
            training: TrainingSection {
                cv_folds: 3,
                parallel: true,
            },
            models,
            export: crate::quantize::ExportConfig {
                out_dir: out_dir.to_path_buf(),
                ..crate::quantize::ExportConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    fn logistic(name: &str, c: Vec<f64>) -> ModelSpec {
        ModelSpec::new(
            name,
            AlgorithmGrid::LogisticRegression(LogisticGrid {
                c,
                max_iter: vec![100],
            }),
        )
    }

    fn forest(name: &str, n_estimators: usize, max_depth: usize) -> ModelSpec {
        ModelSpec::new(
            name,
            AlgorithmGrid::RandomForest(ForestGrid {
                n_estimators: vec![n_estimators],
                max_depth: vec![max_depth],
                min_samples_split: vec![2],
                min_samples_leaf: vec![1],
                max_features: vec![MaxFeatures::Sqrt],
            }),
        )
    }

    fn boosting(name: &str) -> ModelSpec {
        ModelSpec::new(
            name,
            AlgorithmGrid::GradientBoosting(BoostingGrid {
                n_estimators: vec![20],
                learning_rate: vec![0.3],
                max_depth: vec![3],
                subsample: vec![1.0],
            }),
        )
    }

    fn write_dataset(dir: &Path, rows: usize) -> std::path::PathBuf {
        let path = dir.join("readings.csv");
        Dataset::synthetic(rows, 2024).write_csv(&path).unwrap();
        path
    }

    #[test]
    fn ensembles_beat_linear_baseline_on_large_dataset() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 60_000);
        let bus = Arc::new(MemoryEventBus::new(64));
        let telemetry = PipelineTelemetry::builder("heater-learning")
            .log_path(dir.path().join("logs/run.log.jsonl"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let pipeline = HeaterPipeline::new(config(
            &data,
            &dir.path().join("out"),
            vec![
                logistic("baseline", vec![1.0]),
                forest("forest_wide", 10, 6),
                forest("forest_small", 5, 4),
                boosting("boosting"),
            ],
        ));
        let run = pipeline.run(Some(&telemetry)).unwrap();

        let report = &run.report;
        assert_eq!(report.specifications.len(), 4);
        assert!(report
            .specifications
            .values()
            .all(|spec| spec.status == SpecStatus::Succeeded && spec.evaluation.is_some()));
        let selected = &report.specifications[run.selected.as_str()];
        assert!(matches!(
            selected.kind,
            AlgorithmKind::RandomForest | AlgorithmKind::GradientBoosting
        ));
        let f1 = |name: &str| report.specifications[name].evaluation.as_ref().unwrap().f1;
        assert!(f1(&run.selected) > f1("baseline"));
        assert_eq!(report.dataset.rows, 60_000);
        assert_eq!(report.dataset.train_rows + report.dataset.test_rows, 60_000);

        let export = report.export.as_ref().unwrap();
        assert!(export.verification.passed());
        assert_eq!(export.table_entries, 32 * 32 * 32);
        assert!(run.report_paths.json.exists());
        assert!(run.report_paths.text.exists());

        for stage in ["load", "analyze", "split", "train", "select", "export", "report"] {
            assert_eq!(
                bus.of_type(&format!("pipeline.{stage}.completed")).len(),
                1,
                "{stage}"
            );
        }
        let log = std::fs::read_to_string(dir.path().join("logs/run.log.jsonl")).unwrap();
        assert!(log.contains("export.completed"));
        assert!(log.contains(telemetry.run_id()));
    }

    #[test]
    fn invalid_specification_is_recorded_as_failed() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 2_000);
        let bus = Arc::new(MemoryEventBus::new(64));
        let telemetry = PipelineTelemetry::builder("heater-learning")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let run = HeaterPipeline::new(config(
            &data,
            &dir.path().join("out"),
            vec![logistic("bad_logistic", vec![0.0, 1.0]), forest("forest", 5, 5)],
        ))
        .run(Some(&telemetry))
        .unwrap();

        let bad = &run.report.specifications["bad_logistic"];
        assert_eq!(bad.status, SpecStatus::Failed);
        assert!(bad.failure_reason.is_some());
        assert_eq!(run.report.specifications["forest"].status, SpecStatus::Succeeded);
        assert_eq!(run.selected, "forest");
        let failed = bus.of_type("pipeline.spec.failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["spec"], "bad_logistic");
    }

    #[test]
    fn all_failed_writes_partial_report() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 500);
        let out = dir.path().join("out");
        let err = HeaterPipeline::new(config(
            &data,
            &out,
            vec![logistic("bad", vec![0.0])],
        ))
        .run(None)
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SelectionError>(),
            Some(SelectionError::NoViableModel(1))
        ));
        let report: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(out.join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report.selected_model, None);
        assert_eq!(report.specifications["bad"].status, SpecStatus::Failed);
        assert!(!out.join(LOOKUP_TABLE_FILE).exists());
    }

    #[test]
    fn exported_table_maps_upper_temperature_bound_to_last_bin() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 2_000);
        let out = dir.path().join("out");
        HeaterPipeline::new(config(&data, &out, vec![forest("forest", 5, 5)]))
            .run(None)
            .unwrap();
        let table = LookupTable::load(out.join(LOOKUP_TABLE_FILE)).unwrap();
        let grid = table.grid();
        assert_eq!(grid.key(&[40.0, 70.0, 10.0]).temperature, 31);
        assert_eq!(grid.key(&[13.0, 70.0, 10.0]).temperature, 0);
        assert_eq!(
            table.lookup(40.0, 70.0, 10.0),
            table.get(grid.key(&[39.9, 70.0, 10.0]))
        );
    }

    #[test]
    fn repeated_runs_produce_identical_artifacts() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 3_000);
        let models = vec![logistic("baseline", vec![0.1, 1.0]), boosting("boosting")];
        let outs = [dir.path().join("a"), dir.path().join("b")];
        let runs: Vec<PipelineRun> = outs
            .iter()
            .map(|out| {
                HeaterPipeline::new(config(&data, out, models.clone()))
                    .run(None)
                    .unwrap()
            })
            .collect();

        assert_eq!(runs[0].selected, runs[1].selected);
        assert_eq!(runs[0].partition, runs[1].partition);
        for (name, spec) in &runs[0].report.specifications {
            assert_eq!(spec.evaluation, runs[1].report.specifications[name].evaluation);
        }
        for file in [LOOKUP_TABLE_FILE, SOURCE_FILE, HEADER_FILE] {
            let a = std::fs::read(outs[0].join(file)).unwrap();
            let b = std::fs::read(outs[1].join(file)).unwrap();
            assert_eq!(a, b, "{file}");
        }
    }

    #[test]
    fn missing_dataset_aborts_with_context() {
        let dir = tempdir().unwrap();
        let err = HeaterPipeline::new(config(
            &dir.path().join("absent.csv"),
            &dir.path().join("out"),
            vec![forest("forest", 5, 5)],
        ))
        .run(None)
        .unwrap_err();
        assert!(format!("{err:#}").contains("loading dataset"));
    }

    #[test]
    fn duplicate_specification_names_are_rejected_before_training() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 500);
        let out = dir.path().join("out");
        let pipeline = HeaterPipeline::new(config(
            &data,
            &out,
            vec![forest("m", 5, 5), logistic("m", vec![0.0])],
        ));
        let err = pipeline.run(None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Invalid(_))
        ));
        let loaded = DatasetLoader::default().load(&data).unwrap();
        let err = pipeline.run_loaded(&loaded, None).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate model name"));
        assert!(!out.join("report.json").exists());
    }

    #[test]
    fn failed_rerun_removes_previous_artifacts() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 2_000);
        let out = dir.path().join("out");
        HeaterPipeline::new(config(&data, &out, vec![forest("forest", 5, 5)]))
            .run(None)
            .unwrap();
        for file in [LOOKUP_TABLE_FILE, SOURCE_FILE, HEADER_FILE] {
            assert!(out.join(file).exists(), "{file}");
        }

        HeaterPipeline::new(config(&data, &out, vec![logistic("bad", vec![0.0])]))
            .run(None)
            .unwrap_err();
        let report: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(out.join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report.selected_model, None);
        for file in [LOOKUP_TABLE_FILE, SOURCE_FILE, HEADER_FILE] {
            assert!(!out.join(file).exists(), "{file}");
        }
    }

    #[test]
    fn export_failure_still_writes_report() {
        let dir = tempdir().unwrap();
        let data = write_dataset(dir.path(), 2_000);
        let out = dir.path().join("out");
        // A directory where the table file belongs makes the write fail.
        std::fs::create_dir_all(out.join(LOOKUP_TABLE_FILE)).unwrap();
        let err = HeaterPipeline::new(config(&data, &out, vec![forest("forest", 5, 5)]))
            .run(None)
            .unwrap_err();
        assert!(format!("{err:#}").contains("exporting forest"));
        let report: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(out.join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report.selected_model.as_deref(), Some("forest"));
        assert_eq!(report.specifications.len(), 1);
        assert_eq!(report.export, None);
        assert!(report.export_error.is_some());
        assert!(!out.join(SOURCE_FILE).exists());
    }
}
