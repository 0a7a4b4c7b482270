use std::{collections::HashSet, fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ClassBalance, Dataset, Sample, CSV_HEADER, N_FEATURES, SENSOR_RANGES};

/// Cell values treated as missing rather than malformed.
const MISSING_MARKERS: [&str; 5] = ["", "na", "nan", "null", "none"];

/// Errors raised while loading a dataset. Any of them aborts the run.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Header or cell does not follow the fixed schema.
    #[error("data format error at line {line}: {reason}")]
    Format {
        /// 1-based line in the file (the header is line 1).
        line: u64,
        /// What was wrong.
        reason: String,
    },
    /// Value outside the documented sensor bounds.
    #[error("data range error at line {line}: {column}={value} outside [{min}, {max}]")]
    Range {
        /// 1-based line in the file.
        line: u64,
        /// Offending column.
        column: &'static str,
        /// Offending value.
        value: f64,
        /// Lower sensor bound.
        min: f64,
        /// Upper sensor bound.
        max: f64,
    },
    /// Missing cell, or no data rows at all.
    #[error("data completeness error at line {line}: {reason}")]
    Completeness {
        /// 1-based line in the file.
        line: u64,
        /// What is missing.
        reason: String,
    },
    /// Partition request cannot be satisfied.
    #[error("cannot partition dataset: {0}")]
    Partition(String),
    /// I/O error (filesystem).
    #[error("io error reading {path}: {source}")]
    Io {
        /// File being read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// CSV tokenizer failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Summary produced alongside a successfully loaded dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Data rows read.
    pub rows: usize,
    /// Label counts.
    pub balance: ClassBalance,
    /// Majority share above the configured threshold. Informational only.
    pub skewed: bool,
    /// Rows identical to an earlier row. Informational only.
    pub duplicates: usize,
}

/// Dataset plus the validation summary produced while reading it.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    /// Validated samples.
    pub dataset: Dataset,
    /// Balance and duplicate report.
    pub summary: ValidationSummary,
}

/// Reads and validates the fixed-schema readings CSV.
#[derive(Debug, Clone, Copy)]
pub struct DatasetLoader {
    skew_threshold: f64,
}

impl Default for DatasetLoader {
    fn default() -> Self {
        Self {
            skew_threshold: 0.6,
        }
    }
}

impl DatasetLoader {
    /// Creates a loader flagging datasets whose majority share exceeds `skew_threshold`.
    #[must_use]
    pub const fn new(skew_threshold: f64) -> Self {
        Self { skew_threshold }
    }

    /// Loads a CSV file from disk.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadedDataset, DatasetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut loaded = self.load_from_reader(file)?;
        loaded.dataset = loaded.dataset.with_source(path);
        Ok(loaded)
    }

    /// Loads CSV text from any reader.
    pub fn load_from_reader<R: Read>(&self, reader: R) -> Result<LoadedDataset, DatasetError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let names: Vec<&str> = headers.iter().collect();
        if names != CSV_HEADER {
            return Err(DatasetError::Format {
                line: 1,
                reason: format!(
                    "expected columns {} but found {}",
                    CSV_HEADER.join(","),
                    names.join(",")
                ),
            });
        }

        let mut samples = Vec::new();
        let mut seen = HashSet::new();
        let mut duplicates = 0;
        for record in csv_reader.records() {
            let record = record?;
            let line = record.position().map_or(0, csv::Position::line);
            if record.len() != CSV_HEADER.len() {
                return Err(DatasetError::Format {
                    line,
                    reason: format!(
                        "expected {} columns but found {}",
                        CSV_HEADER.len(),
                        record.len()
                    ),
                });
            }
            let mut features = [0.0; N_FEATURES];
            for (idx, slot) in features.iter_mut().enumerate() {
                let value = parse_cell(&record[idx], line, CSV_HEADER[idx])?;
                let range = SENSOR_RANGES[idx];
                if !range.contains(value) {
                    return Err(DatasetError::Range {
                        line,
                        column: CSV_HEADER[idx],
                        value,
                        min: range.min,
                        max: range.max,
                    });
                }
                *slot = value;
            }
            let label = parse_label(&record[N_FEATURES], line)?;
            let key = [
                features[0].to_bits(),
                features[1].to_bits(),
                features[2].to_bits(),
                u64::from(label),
            ];
            if !seen.insert(key) {
                duplicates += 1;
            }
            samples.push(Sample { features, label });
        }

        if samples.is_empty() {
            return Err(DatasetError::Completeness {
                line: 2,
                reason: "dataset has a header but no rows".into(),
            });
        }

        let dataset = Dataset::from_samples(samples);
        let balance = dataset.class_balance();
        let summary = ValidationSummary {
            rows: dataset.len(),
            balance,
            skewed: balance.is_skewed(self.skew_threshold),
            duplicates,
        };
        Ok(LoadedDataset { dataset, summary })
    }
}

fn is_missing(raw: &str) -> bool {
    MISSING_MARKERS
        .iter()
        .any(|marker| raw.eq_ignore_ascii_case(marker))
}

fn parse_cell(raw: &str, line: u64, column: &'static str) -> Result<f64, DatasetError> {
    if is_missing(raw) {
        return Err(DatasetError::Completeness {
            line,
            reason: format!("missing value in column {column}"),
        });
    }
    raw.parse::<f64>().map_err(|_| DatasetError::Format {
        line,
        reason: format!("column {column} is not numeric: {raw:?}"),
    })
}

fn parse_label(raw: &str, line: u64) -> Result<u8, DatasetError> {
    let value = parse_cell(raw, line, CSV_HEADER[N_FEATURES])?;
    if value.abs() < f64::EPSILON {
        Ok(0)
    } else if (value - 1.0).abs() < f64::EPSILON {
        Ok(1)
    } else {
        Err(DatasetError::Format {
            line,
            reason: format!("label must be 0 or 1, found {raw}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn load(text: &str) -> Result<LoadedDataset, DatasetError> {
        DatasetLoader::default().load_from_reader(text.as_bytes())
    }

    #[test]
    fn loads_valid_rows_and_reports_balance() {
        let loaded = load("Temp,Humidity,LDR,Heater\n20.5,80,10,1\n31,75.5,90,0\n20.5,80,10,1\n")
            .unwrap();
        assert_eq!(loaded.summary.rows, 3);
        assert_eq!(loaded.summary.balance, ClassBalance { off: 1, on: 2 });
        assert!(loaded.summary.skewed);
        assert_eq!(loaded.summary.duplicates, 1);
        assert!((loaded.dataset.samples()[1].humidity() - 75.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_wrong_header() {
        let err = load("Temp,Humidity,Light,Heater\n20,80,10,1\n").unwrap_err();
        assert!(matches!(err, DatasetError::Format { line: 1, .. }));
    }

    #[test]
    fn rejects_wrong_column_count() {
        let err = load("Temp,Humidity,LDR,Heater\n20,80,10\n").unwrap_err();
        assert!(matches!(err, DatasetError::Format { line: 2, .. }));
    }

    #[test]
    fn rejects_out_of_range_values_instead_of_clipping() {
        let err = load("Temp,Humidity,LDR,Heater\n20,80,10,1\n20,101,10,0\n").unwrap_err();
        match err {
            DatasetError::Range {
                line, column, value, ..
            } => {
                assert_eq!(line, 3);
                assert_eq!(column, "Humidity");
                assert!((value - 101.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_non_finite_values_as_range_errors() {
        let err = load("Temp,Humidity,LDR,Heater\ninf,80,10,1\n").unwrap_err();
        assert!(matches!(err, DatasetError::Range { .. }));
    }

    #[test]
    fn rejects_missing_values() {
        let err = load("Temp,Humidity,LDR,Heater\n20,,10,1\n").unwrap_err();
        assert!(matches!(err, DatasetError::Completeness { line: 2, .. }));
        let err = load("Temp,Humidity,LDR,Heater\n20,80,NaN,1\n").unwrap_err();
        assert!(matches!(err, DatasetError::Completeness { .. }));
    }

    #[test]
    fn rejects_header_only_file() {
        let err = load("Temp,Humidity,LDR,Heater\n").unwrap_err();
        assert!(matches!(err, DatasetError::Completeness { .. }));
    }

    #[test]
    fn rejects_non_binary_labels() {
        let err = load("Temp,Humidity,LDR,Heater\n20,80,10,2\n").unwrap_err();
        assert!(matches!(err, DatasetError::Format { .. }));
    }

    #[test]
    fn load_records_source_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.csv");
        Dataset::synthetic(25, 3).write_csv(&path).unwrap();
        let loaded = DatasetLoader::default().load(&path).unwrap();
        assert_eq!(loaded.dataset.len(), 25);
        assert_eq!(loaded.dataset.source(), Some(path.as_path()));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = DatasetLoader::default()
            .load("/definitely/not/here.csv")
            .unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }
}
