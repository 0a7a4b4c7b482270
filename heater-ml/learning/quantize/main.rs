//! Quantization of the selected model into a lookup table and fixed-point C.
//!
//! Every emitted program is checked by interpreting it at each bin midpoint
//! against the lookup table. A branch program that is too large or disagrees
//! falls back to the table form; a table that disagrees is fatal.

/// Bin specifications and the boundary rule.
pub mod bins;
/// C source rendering.
pub mod codegen;
/// Integer decision programs.
pub mod fixed;
/// Lookup table and its JSON artifact.
pub mod lookup;
/// Text rules for single trees.
pub mod rules;

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classical_ml::TrainedModel;
use bins::QuantizationGrid;
use codegen::CodegenContext;
use fixed::{DecisionProgram, FixedBins, QFormat};
use lookup::LookupTable;

/// Lookup table artifact name.
pub const LOOKUP_TABLE_FILE: &str = "lookup_table.json";
/// Generated C source name.
pub const SOURCE_FILE: &str = "heater_model.c";
/// Generated C header name.
pub const HEADER_FILE: &str = "heater_model.h";
/// Tree rules name, only written for single decision trees.
pub const RULES_FILE: &str = "decision_tree_rules.txt";

/// Most fractional bits accepted for inputs.
pub const MAX_FRACTIONAL_BITS: u32 = 16;
/// Fewest Q-format steps a bin must span.
pub const MIN_QUANTA_PER_BIN: f64 = 4.0;

/// Export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The packed table disagrees with the lookup table it was built from.
    #[error("table program disagrees with the lookup table in {mismatches} of {checked} bins")]
    TableMismatch {
        /// Disagreeing bins.
        mismatches: usize,
        /// Bins checked.
        checked: usize,
    },
    /// Settings cannot produce a faithful integer program.
    #[error("invalid export settings: {0}")]
    InvalidSettings(String),
    /// Lookup table file is malformed.
    #[error("invalid lookup table artifact: {0}")]
    InvalidArtifact(String),
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        source: io::Error,
    },
    /// JSON encoding or decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Source rendering failure.
    #[error("code rendering failed: {0}")]
    Render(#[from] fmt::Error),
}

impl ExportError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Code generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStrategy {
    /// Branch code, falling back to the table.
    #[default]
    Auto,
    /// Branch code was asked for explicitly; same fallback rules.
    Branch,
    /// Bit-packed lookup table.
    Table,
}

impl fmt::Display for ExportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Branch => "branch",
            Self::Table => "table",
        })
    }
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

const fn default_fractional_bits() -> u32 {
    8
}

const fn default_max_branch_nodes() -> usize {
    4096
}

/// Exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory receiving the artifacts and the report.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Requested strategy.
    #[serde(default)]
    pub strategy: ExportStrategy,
    /// Fractional bits of the Q-format inputs.
    #[serde(default = "default_fractional_bits")]
    pub fractional_bits: u32,
    /// Largest branch program emitted before falling back to the table.
    #[serde(default = "default_max_branch_nodes")]
    pub max_branch_nodes: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
            strategy: ExportStrategy::default(),
            fractional_bits: default_fractional_bits(),
            max_branch_nodes: default_max_branch_nodes(),
        }
    }
}

/// Result of interpreting a program at every bin midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Bins checked.
    pub checked: usize,
    /// Bins where the program disagrees with the table.
    pub mismatches: usize,
}

impl Verification {
    /// Whether every bin agreed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

/// Evaluates `program` at each bin midpoint in Q format.
#[must_use]
pub fn verify(program: &DecisionProgram, table: &LookupTable, q: QFormat) -> Verification {
    let grid = table.grid();
    let mismatches = grid
        .keys()
        .filter(|&key| program.evaluate(&q.to_q3(&grid.midpoint(key))) != table.get(key))
        .count();
    Verification {
        checked: table.len(),
        mismatches,
    }
}

/// Artifacts rendered in memory, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedExport {
    /// Lookup table.
    pub table: LookupTable,
    /// Program emitted as C.
    pub program: DecisionProgram,
    /// `heater_model.h` text.
    pub header: String,
    /// `heater_model.c` text.
    pub source: String,
    /// Tree rules text for single decision trees.
    pub rules: Option<String>,
    /// Strategy asked for.
    pub requested: ExportStrategy,
    /// Strategy emitted, `Branch` or `Table`.
    pub strategy: ExportStrategy,
    /// Why branch code was not emitted.
    pub fallback: Option<String>,
    /// Size of the branch program when one was built.
    pub branch_nodes: Option<usize>,
    /// Verification of the emitted program.
    pub verification: Verification,
}

/// Paths written by an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifacts {
    /// Lookup table JSON.
    pub lookup_table: PathBuf,
    /// C source.
    pub source: PathBuf,
    /// C header.
    pub header: PathBuf,
    /// Tree rules, when written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<PathBuf>,
}

/// Summary of a completed export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    /// Strategy asked for.
    pub requested: ExportStrategy,
    /// Strategy emitted.
    pub strategy: ExportStrategy,
    /// Why branch code was not emitted.
    pub fallback: Option<String>,
    /// Size of the branch program when one was built.
    pub branch_nodes: Option<usize>,
    /// Verification of the emitted program.
    pub verification: Verification,
    /// Lookup table entries.
    pub table_entries: usize,
    /// Written files.
    pub artifacts: ExportArtifacts,
}

/// Builds, verifies and writes the deployment artifacts.
#[derive(Debug, Clone)]
pub struct Exporter {
    config: ExportConfig,
    grid: QuantizationGrid,
}

impl Exporter {
    /// Creates an exporter.
    #[must_use]
    pub const fn new(config: ExportConfig, grid: QuantizationGrid) -> Self {
        Self { config, grid }
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &ExportConfig {
        &self.config
    }

    fn q_format(&self) -> QFormat {
        QFormat {
            fractional_bits: self.config.fractional_bits,
        }
    }

    /// Rejects settings an integer program cannot represent.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.config.fractional_bits > MAX_FRACTIONAL_BITS {
            return Err(ExportError::InvalidSettings(format!(
                "fractional_bits must be at most {MAX_FRACTIONAL_BITS}, got {}",
                self.config.fractional_bits
            )));
        }
        self.grid.validate().map_err(ExportError::InvalidSettings)?;
        let q = self.q_format();
        for (name, spec) in crate::dataset::FEATURE_NAMES.iter().zip(self.grid.specs()) {
            if spec.width() * q.scale() < MIN_QUANTA_PER_BIN {
                return Err(ExportError::InvalidSettings(format!(
                    "{name} bins are narrower than {MIN_QUANTA_PER_BIN} fixed-point steps"
                )));
            }
            let limit = f64::from(i32::MAX) / q.scale();
            if spec.min.abs() >= limit || spec.max.abs() >= limit {
                return Err(ExportError::InvalidSettings(format!(
                    "{name} range does not fit 32-bit Q-format inputs"
                )));
            }
        }
        Ok(())
    }

    /// Builds the table, picks and verifies the program, and renders text.
    pub fn prepare(&self, model_name: &str, model: &TrainedModel) -> Result<PreparedExport, ExportError> {
        self.validate()?;
        let q = self.q_format();
        let table = LookupTable::build(model, self.grid);
        let table_program = DecisionProgram::table(&table, q);
        let table_check = verify(&table_program, &table, q);
        if !table_check.passed() {
            return Err(ExportError::TableMismatch {
                mismatches: table_check.mismatches,
                checked: table_check.checked,
            });
        }

        let requested = self.config.strategy;
        let mut branch_nodes = None;
        let mut fallback = None;
        let mut chosen = (table_program, ExportStrategy::Table, table_check);
        if requested != ExportStrategy::Table {
            let branch = DecisionProgram::branch(model, q);
            let nodes = branch.node_count();
            branch_nodes = Some(nodes);
            if nodes > self.config.max_branch_nodes {
                fallback = Some(format!(
                    "branch program has {nodes} nodes, above the budget of {}",
                    self.config.max_branch_nodes
                ));
            } else {
                let check = verify(&branch, &table, q);
                if check.passed() {
                    chosen = (branch, ExportStrategy::Branch, check);
                } else {
                    fallback = Some(format!(
                        "branch program disagrees with the lookup table in {} of {} bins",
                        check.mismatches, check.checked
                    ));
                }
            }
        }
        let (program, strategy, verification) = chosen;

        let ctx = CodegenContext {
            model_name,
            kind: model.kind(),
            q,
        };
        let bins = self.grid.specs().map(|spec| {
            let fixed = FixedBins::from_spec(&spec, q);
            (fixed.lo, fixed.hi, fixed.bins)
        });
        let header = codegen::render_header(&ctx, &program, &bins)?;
        let source = codegen::render_source(&ctx, &program)?;
        let rules = match model {
            TrainedModel::DecisionTree { tree, .. } => Some(rules::render_rules(model_name, tree)?),
            _ => None,
        };

        Ok(PreparedExport {
            table,
            program,
            header,
            source,
            rules,
            requested,
            strategy,
            fallback,
            branch_nodes,
            verification,
        })
    }

    /// Writes prepared artifacts into the output directory, replacing
    /// previous ones and removing stale tree rules.
    pub fn write(&self, prepared: &PreparedExport) -> Result<ExportOutcome, ExportError> {
        let dir = &self.config.out_dir;
        fs::create_dir_all(dir).map_err(|source| ExportError::io(dir, source))?;
        let artifacts = ExportArtifacts {
            lookup_table: dir.join(LOOKUP_TABLE_FILE),
            source: dir.join(SOURCE_FILE),
            header: dir.join(HEADER_FILE),
            rules: prepared.rules.as_ref().map(|_| dir.join(RULES_FILE)),
        };
        prepared.table.save(&artifacts.lookup_table)?;
        write_text(&artifacts.source, &prepared.source)?;
        write_text(&artifacts.header, &prepared.header)?;
        let rules_path = dir.join(RULES_FILE);
        match &prepared.rules {
            Some(text) => write_text(&rules_path, text)?,
            None if rules_path.exists() => {
                fs::remove_file(&rules_path).map_err(|source| ExportError::io(&rules_path, source))?;
            }
            None => {}
        }
        Ok(ExportOutcome {
            requested: prepared.requested,
            strategy: prepared.strategy,
            fallback: prepared.fallback.clone(),
            branch_nodes: prepared.branch_nodes,
            verification: prepared.verification,
            table_entries: prepared.table.len(),
            artifacts,
        })
    }

    /// Deletes every artifact an earlier export may have left in the output
    /// directory and returns the removed paths.
    pub fn clear(&self) -> Result<Vec<PathBuf>, ExportError> {
        let dir = &self.config.out_dir;
        let mut removed = Vec::new();
        for name in [LOOKUP_TABLE_FILE, SOURCE_FILE, HEADER_FILE, RULES_FILE] {
            let path = dir.join(name);
            if path.is_file() {
                fs::remove_file(&path).map_err(|source| ExportError::io(&path, source))?;
                removed.push(path);
            }
        }
        Ok(removed)
    }

    /// Prepares and writes in one step.
    pub fn export(&self, model_name: &str, model: &TrainedModel) -> Result<ExportOutcome, ExportError> {
        let prepared = self.prepare(model_name, model)?;
        self.write(&prepared)
    }
}

fn write_text(path: &Path, text: &str) -> Result<(), ExportError> {
    fs::write(path, text).map_err(|source| ExportError::io(path, source))
}
