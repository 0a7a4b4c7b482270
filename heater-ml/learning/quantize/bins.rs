use serde::{Deserialize, Serialize};

use crate::dataset::N_FEATURES;

/// Largest bin count per feature.
pub const MAX_BINS: usize = 255;

/// Equal-width bins over a declared feature range.
///
/// Bins are half-open `[edge_i, edge_{i+1})`: a value exactly on an edge
/// belongs to the bin that edge opens. Values below `min` (and NaN) fall in
/// bin 0, values at or above `max` in the last bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinSpec {
    /// Lower bound of the declared range.
    pub min: f64,
    /// Upper bound of the declared range.
    pub max: f64,
    /// Number of bins, 1..=255.
    pub bins: usize,
}

impl BinSpec {
    /// Creates a spec without validation; see [`BinSpec::validate`].
    #[must_use]
    pub const fn new(min: f64, max: f64, bins: usize) -> Self {
        Self { min, max, bins }
    }

    /// Checks bounds and bin count.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min.is_finite() && self.max.is_finite()) {
            return Err(format!("range [{}, {}] is not finite", self.min, self.max));
        }
        if self.min >= self.max {
            return Err(format!("min {} must be below max {}", self.min, self.max));
        }
        if self.bins == 0 || self.bins > MAX_BINS {
            return Err(format!("bins must be in 1..={MAX_BINS}, got {}", self.bins));
        }
        Ok(())
    }

    /// Width of one bin.
    #[must_use]
    pub fn width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    /// Lower edge of bin `idx`; `edge(bins)` is `max`.
    #[must_use]
    pub fn edge(&self, idx: usize) -> f64 {
        if idx >= self.bins {
            return self.max;
        }
        self.min + (self.max - self.min) * idx as f64 / self.bins as f64
    }

    /// Representative point of bin `idx`.
    #[must_use]
    pub fn midpoint(&self, idx: usize) -> f64 {
        self.min + (self.max - self.min) * (2 * idx + 1) as f64 / (2 * self.bins) as f64
    }

    /// Bin holding `value`. Never fails.
    #[must_use]
    pub fn index(&self, value: f64) -> usize {
        let last = self.bins.saturating_sub(1);
        if value.is_nan() || value <= self.min {
            return 0;
        }
        if value >= self.max {
            return last;
        }
        let mut idx = (((value - self.min) / (self.max - self.min)) * self.bins as f64).floor();
        if !idx.is_finite() || idx < 0.0 {
            idx = 0.0;
        }
        let mut idx = (idx as usize).min(last);
        // Settle rounding against the same edges `edge` reports.
        while idx > 0 && value < self.edge(idx) {
            idx -= 1;
        }
        while idx < last && value >= self.edge(idx + 1) {
            idx += 1;
        }
        idx
    }
}

/// Per-feature bin specifications in training order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationGrid {
    /// Temperature bins (°C).
    pub temperature: BinSpec,
    /// Humidity bins (%).
    pub humidity: BinSpec,
    /// Light bins (0-100).
    pub light: BinSpec,
}

impl Default for QuantizationGrid {
    fn default() -> Self {
        Self {
            temperature: BinSpec::new(13.0, 40.0, 32),
            humidity: BinSpec::new(0.0, 100.0, 32),
            light: BinSpec::new(0.0, 100.0, 32),
        }
    }
}

/// Bin coordinates of one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BinKey {
    /// Temperature bin.
    pub temperature: usize,
    /// Humidity bin.
    pub humidity: usize,
    /// Light bin.
    pub light: usize,
}

impl QuantizationGrid {
    /// Specs in feature order.
    #[must_use]
    pub const fn specs(&self) -> [BinSpec; N_FEATURES] {
        [self.temperature, self.humidity, self.light]
    }

    /// Validates every spec.
    pub fn validate(&self) -> Result<(), String> {
        for (name, spec) in crate::dataset::FEATURE_NAMES.iter().zip(self.specs()) {
            spec.validate().map_err(|reason| format!("{name}: {reason}"))?;
        }
        Ok(())
    }

    /// Number of bin combinations.
    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.temperature.bins * self.humidity.bins * self.light.bins
    }

    /// Bins of a reading.
    #[must_use]
    pub fn key(&self, features: &[f64; N_FEATURES]) -> BinKey {
        BinKey {
            temperature: self.temperature.index(features[0]),
            humidity: self.humidity.index(features[1]),
            light: self.light.index(features[2]),
        }
    }

    /// Representative reading of a bin combination.
    #[must_use]
    pub fn midpoint(&self, key: BinKey) -> [f64; N_FEATURES] {
        [
            self.temperature.midpoint(key.temperature),
            self.humidity.midpoint(key.humidity),
            self.light.midpoint(key.light),
        ]
    }

    /// Flat position in temperature-major, then humidity, then light order.
    #[must_use]
    pub const fn flat_index(&self, key: BinKey) -> usize {
        (key.temperature * self.humidity.bins + key.humidity) * self.light.bins + key.light
    }

    /// Every bin combination in flat order.
    pub fn keys(&self) -> impl Iterator<Item = BinKey> + '_ {
        (0..self.temperature.bins).flat_map(move |temperature| {
            (0..self.humidity.bins).flat_map(move |humidity| {
                (0..self.light.bins).map(move |light| BinKey {
                    temperature,
                    humidity,
                    light,
                })
            })
        })
    }
}
