use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use super::{
    bins::{BinKey, BinSpec, QuantizationGrid},
    ExportError,
};
use crate::{classical_ml::TrainedModel, dataset::FEATURE_NAMES};

/// Format tag written into the artifact.
pub const LOOKUP_FORMAT: &str = "heater-lookup-table/v1";
/// Layout description written into the artifact.
pub const LOOKUP_LAYOUT: &str = "temperature-major, then humidity, then light";

/// Complete bin-combination → label table, frozen after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    grid: QuantizationGrid,
    labels: Vec<u8>,
}

/// On-disk form of a [`LookupTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupTableArtifact {
    /// Format tag.
    pub format: String,
    /// Feature order of the nested arrays.
    pub feature_order: Vec<String>,
    /// Temperature bins.
    pub temperature: BinSpec,
    /// Humidity bins.
    pub humidity: BinSpec,
    /// Light bins.
    pub light: BinSpec,
    /// Layout description.
    pub layout: String,
    /// `labels[t][h][l]`.
    pub labels: Vec<Vec<Vec<u8>>>,
}

impl LookupTable {
    /// Labels every bin midpoint with `model`.
    #[must_use]
    pub fn build(model: &TrainedModel, grid: QuantizationGrid) -> Self {
        let labels = grid
            .keys()
            .map(|key| model.predict(&grid.midpoint(key)))
            .collect();
        Self { grid, labels }
    }

    /// Bins the table covers.
    #[must_use]
    pub const fn grid(&self) -> &QuantizationGrid {
        &self.grid
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in flat order.
    #[must_use]
    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Label of a bin combination.
    #[must_use]
    pub fn get(&self, key: BinKey) -> u8 {
        self.labels[self.grid.flat_index(key)]
    }

    /// Label for a raw reading, binned with the shared boundary rule.
    #[must_use]
    pub fn lookup(&self, temperature: f64, humidity: f64, light: f64) -> u8 {
        self.get(self.grid.key(&[temperature, humidity, light]))
    }

    /// Share of ON cells.
    #[must_use]
    pub fn on_share(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&label| label == 1).count() as f64 / self.labels.len() as f64
    }

    /// Serializable form with nested label arrays.
    #[must_use]
    pub fn to_artifact(&self) -> LookupTableArtifact {
        let mut rows = self.labels.chunks(self.grid.light.bins.max(1));
        let labels = (0..self.grid.temperature.bins)
            .map(|_| {
                (0..self.grid.humidity.bins)
                    .map(|_| rows.next().map(<[u8]>::to_vec).unwrap_or_default())
                    .collect()
            })
            .collect();
        LookupTableArtifact {
            format: LOOKUP_FORMAT.into(),
            feature_order: FEATURE_NAMES.iter().map(|name| (*name).to_string()).collect(),
            temperature: self.grid.temperature,
            humidity: self.grid.humidity,
            light: self.grid.light,
            layout: LOOKUP_LAYOUT.into(),
            labels,
        }
    }

    /// Rebuilds a table from its artifact, checking shape and values.
    pub fn from_artifact(artifact: LookupTableArtifact) -> Result<Self, ExportError> {
        let invalid = |reason: String| ExportError::InvalidArtifact(reason);
        if artifact.format != LOOKUP_FORMAT {
            return Err(invalid(format!("unknown format {:?}", artifact.format)));
        }
        let grid = QuantizationGrid {
            temperature: artifact.temperature,
            humidity: artifact.humidity,
            light: artifact.light,
        };
        grid.validate().map_err(invalid)?;
        if artifact.labels.len() != grid.temperature.bins {
            return Err(invalid(format!(
                "expected {} temperature rows, found {}",
                grid.temperature.bins,
                artifact.labels.len()
            )));
        }
        let mut labels = Vec::with_capacity(grid.cell_count());
        for plane in artifact.labels {
            if plane.len() != grid.humidity.bins {
                return Err(invalid("humidity dimension mismatch".into()));
            }
            for row in plane {
                if row.len() != grid.light.bins {
                    return Err(invalid("light dimension mismatch".into()));
                }
                if row.iter().any(|&label| label > 1) {
                    return Err(invalid("labels must be 0 or 1".into()));
                }
                labels.extend(row);
            }
        }
        Ok(Self { grid, labels })
    }

    /// Writes the JSON artifact, replacing any previous file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.to_artifact())?;
        fs::write(path, json + "\n").map_err(|source| ExportError::io(path, source))
    }

    /// Reads a JSON artifact.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ExportError::io(path, source))?;
        Self::from_artifact(serde_json::from_str(&text)?)
    }
}
