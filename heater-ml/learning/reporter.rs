use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    classical_ml::{AlgorithmKind, HyperParameters, InferenceCost},
    dataset::{analysis::FeatureAnalysis, ClassBalance},
    metrics::EvaluationResult,
    quantize::ExportOutcome,
    search::SpecOutcome,
};

/// JSON report name.
pub const REPORT_JSON: &str = "report.json";
/// Text summary name.
pub const REPORT_TEXT: &str = "report.txt";

/// Where the training data came from and how it was partitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProvenance {
    /// Source file, when loaded from disk.
    pub source: Option<PathBuf>,
    /// Total rows.
    pub rows: usize,
    /// Training rows.
    pub train_rows: usize,
    /// Test rows.
    pub test_rows: usize,
    /// Held-out share.
    pub test_ratio: f64,
    /// Partition and model seed.
    pub seed: u64,
    /// Label counts.
    pub balance: ClassBalance,
    /// Majority share above the configured threshold.
    pub skewed: bool,
    /// Duplicate rows.
    pub duplicates: usize,
}

/// Specification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    /// A model was trained and evaluated.
    Succeeded,
    /// Training failed; see `failure_reason`.
    Failed,
}

/// Outcome of one specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecReport {
    /// Algorithm family.
    pub kind: AlgorithmKind,
    /// Status.
    pub status: SpecStatus,
    /// Grid points searched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<usize>,
    /// Selected hyperparameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<HyperParameters>,
    /// Test and cross-validation metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationResult>,
    /// Members and depth of the fitted model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_cost: Option<InferenceCost>,
    /// Why training failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&SpecOutcome> for SpecReport {
    fn from(outcome: &SpecOutcome) -> Self {
        match &outcome.result {
            Ok(candidate) => Self {
                kind: outcome.kind,
                status: SpecStatus::Succeeded,
                grid_size: Some(candidate.grid_size),
                hyperparameters: Some(candidate.model.hyperparameters()),
                evaluation: Some(candidate.evaluation.clone()),
                inference_cost: Some(candidate.model.inference_cost()),
                failure_reason: None,
            },
            Err(err) => Self {
                kind: outcome.kind,
                status: SpecStatus::Failed,
                grid_size: None,
                hyperparameters: None,
                evaluation: None,
                inference_cost: None,
                failure_reason: Some(err.to_string()),
            },
        }
    }
}

/// Full run report. Holds no timestamps so identical runs serialize
/// identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Winning specification, absent when every specification failed.
    pub selected_model: Option<String>,
    /// Dataset provenance.
    pub dataset: DatasetProvenance,
    /// Descriptive statistics.
    pub analysis: FeatureAnalysis,
    /// Every specification in declaration order.
    pub specifications: IndexMap<String, SpecReport>,
    /// Export summary, absent when nothing was exported.
    pub export: Option<ExportOutcome>,
    /// Why export failed after a model was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_error: Option<String>,
}

impl PipelineReport {
    /// Collects spec outcomes in declaration order.
    #[must_use]
    pub fn new(
        dataset: DatasetProvenance,
        analysis: FeatureAnalysis,
        outcomes: &[SpecOutcome],
    ) -> Self {
        Self {
            selected_model: None,
            dataset,
            analysis,
            specifications: outcomes
                .iter()
                .map(|outcome| (outcome.name.clone(), SpecReport::from(outcome)))
                .collect(),
            export: None,
            export_error: None,
        }
    }

    /// Human-readable summary.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "HEATER MODEL PIPELINE REPORT")?;
        writeln!(out, "============================")?;
        writeln!(out)?;
        let data = &self.dataset;
        writeln!(out, "Dataset")?;
        if let Some(source) = &data.source {
            writeln!(out, "  source:      {}", source.display())?;
        }
        writeln!(
            out,
            "  rows:        {} (train {}, test {}, test ratio {}, seed {})",
            data.rows, data.train_rows, data.test_rows, data.test_ratio, data.seed
        )?;
        writeln!(
            out,
            "  balance:     OFF {} / ON {} (majority {:.1}%){}",
            data.balance.off,
            data.balance.on,
            data.balance.majority_share() * 100.0,
            if data.skewed { " SKEWED" } else { "" }
        )?;
        writeln!(out, "  duplicates:  {}", data.duplicates)?;
        writeln!(out)?;

        writeln!(out, "Features")?;
        for (idx, column) in self.analysis.columns.iter().enumerate() {
            let label_corr = self.analysis.correlation.get(idx).and_then(|row| row.last().copied().flatten());
            writeln!(
                out,
                "  {:<12} mean {:>8.3}  std {:>8.3}  min {:>8.3}  max {:>8.3}  corr(heater) {}",
                column.name,
                column.mean,
                column.std,
                column.min,
                column.max,
                label_corr.map_or_else(|| "n/a".to_string(), |c| format!("{c:+.3}"))
            )?;
        }
        writeln!(out)?;

        writeln!(out, "Models")?;
        for (name, spec) in &self.specifications {
            let marker = if self.selected_model.as_deref() == Some(name.as_str()) {
                "*"
            } else {
                " "
            };
            match (&spec.evaluation, &spec.failure_reason) {
                (Some(eval), _) => writeln!(
                    out,
                    " {marker} {name:<24} {:<20} f1 {:.4}  acc {:.4}  prec {:.4}  rec {:.4}  auc {}  cv {:.4}±{:.4}",
                    spec.kind.as_str(),
                    eval.f1,
                    eval.accuracy,
                    eval.precision,
                    eval.recall,
                    eval.roc_auc.map_or_else(|| "n/a".to_string(), |auc| format!("{auc:.4}")),
                    eval.cross_validation.mean_f1,
                    eval.cross_validation.variance.sqrt(),
                )?,
                (None, reason) => writeln!(
                    out,
                    " {marker} {name:<24} {:<20} FAILED: {}",
                    spec.kind.as_str(),
                    reason.as_deref().unwrap_or("unknown")
                )?,
            }
        }
        writeln!(out)?;

        writeln!(
            out,
            "Selected model: {}",
            self.selected_model.as_deref().unwrap_or("none")
        )?;
        if let Some(error) = &self.export_error {
            writeln!(out)?;
            writeln!(out, "Export FAILED: {error}")?;
        }
        if let Some(export) = &self.export {
            writeln!(out)?;
            writeln!(out, "Export")?;
            writeln!(
                out,
                "  strategy:    {} (requested {})",
                export.strategy, export.requested
            )?;
            if let Some(reason) = &export.fallback {
                writeln!(out, "  fallback:    {reason}")?;
            }
            writeln!(
                out,
                "  verified:    {} of {} bins agree",
                export.verification.checked - export.verification.mismatches,
                export.verification.checked
            )?;
            writeln!(out, "  table:       {}", export.artifacts.lookup_table.display())?;
            writeln!(out, "  source:      {}", export.artifacts.source.display())?;
            writeln!(out, "  header:      {}", export.artifacts.header.display())?;
            if let Some(rules) = &export.artifacts.rules {
                writeln!(out, "  rules:       {}", rules.display())?;
            }
        }
        Ok(())
    }
}

/// Paths of a written report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    /// JSON report.
    pub json: PathBuf,
    /// Text summary.
    pub text: PathBuf,
}

/// Writes `report.json` and `report.txt`, replacing earlier runs.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    out_dir: PathBuf,
}

impl ReportWriter {
    /// Writer targeting `out_dir`.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// Output directory.
    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Writes both files.
    pub fn write(&self, report: &PipelineReport) -> anyhow::Result<ReportPaths> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("creating report directory {}", self.out_dir.display()))?;
        let paths = ReportPaths {
            json: self.out_dir.join(REPORT_JSON),
            text: self.out_dir.join(REPORT_TEXT),
        };
        let json = serde_json::to_string_pretty(report).context("serializing report")?;
        fs::write(&paths.json, json + "\n")
            .with_context(|| format!("writing {}", paths.json.display()))?;
        fs::write(&paths.text, report.render_text())
            .with_context(|| format!("writing {}", paths.text.display()))?;
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classical_ml::TrainingError,
        dataset::{analysis::FeatureAnalyzer, Dataset},
    };
    use tempfile::tempdir;

    fn report() -> PipelineReport {
        let dataset = Dataset::synthetic(200, 4);
        let outcomes = vec![SpecOutcome {
            name: "bad_logistic".into(),
            kind: AlgorithmKind::LogisticRegression,
            result: Err(TrainingError::InvalidHyperParameters(
                "C must be a positive finite number, got 0".into(),
            )),
        }];
        PipelineReport::new(
            DatasetProvenance {
                source: None,
                rows: dataset.len(),
                train_rows: 160,
                test_rows: 40,
                test_ratio: 0.2,
                seed: 42,
                balance: dataset.class_balance(),
                skewed: false,
                duplicates: 0,
            },
            FeatureAnalyzer.analyze(&dataset),
            &outcomes,
        )
    }

    #[test]
    fn failed_specs_carry_reason() {
        let report = report();
        let spec = &report.specifications["bad_logistic"];
        assert_eq!(spec.status, SpecStatus::Failed);
        assert!(spec.failure_reason.as_deref().unwrap().contains("C must be"));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["specifications"]["bad_logistic"]["status"], "failed");
        assert!(value["specifications"]["bad_logistic"].get("evaluation").is_none());
    }

    #[test]
    fn writes_json_and_text() {
        let dir = tempdir().unwrap();
        let paths = ReportWriter::new(dir.path()).write(&report()).unwrap();
        let text = std::fs::read_to_string(&paths.text).unwrap();
        assert!(text.contains("FAILED"));
        assert!(text.contains("Selected model: none"));
        let json: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(json.specifications.len(), 1);
        assert_eq!(json.dataset.rows, 200);
        assert_eq!(json.selected_model, None);
    }

    #[test]
    fn export_failure_is_reported() {
        let dir = tempdir().unwrap();
        let mut failed = report();
        failed.selected_model = Some("forest".into());
        failed.export_error = Some("io error on out/lookup_table.json".into());
        let paths = ReportWriter::new(dir.path()).write(&failed).unwrap();
        let text = std::fs::read_to_string(&paths.text).unwrap();
        assert!(text.contains("Export FAILED: io error"));
        let json: PipelineReport =
            serde_json::from_str(&std::fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(json.export, None);
        assert_eq!(json.export_error, failed.export_error);
        let clean = serde_json::to_value(report()).unwrap();
        assert!(clean.get("export_error").is_none());
    }
}
