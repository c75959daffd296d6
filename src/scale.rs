//! Per-axis standardization of coordinate data.
//!
//! Latitude, longitude, and altitude live on very different scales, and a
//! Euclidean mixture model would let the widest axis dominate. The scaler
//! rescales each axis to zero mean and unit variance before fitting, and maps
//! fitted centers back to original units afterwards.
//!
//! Statistics are recomputed from the full point history on every fit; there
//! is no incremental update.

use crate::error::{Error, Result};

/// Per-axis z-score scaler with an inverse transform.
///
/// An axis whose variance is zero keeps a scale factor of 1.0, so it is
/// centered but otherwise untouched. Constant axes (a fleet of detections at
/// identical altitude, say) pass through without a division by zero.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Create an unfitted scaler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit to `data` and return the standardized rows.
    ///
    /// Uses the population standard deviation of each column. Returns
    /// [`Error::EmptyInput`] on empty data and [`Error::DimensionMismatch`]
    /// on ragged rows.
    pub fn fit_transform(&mut self, data: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let d = data[0].len();
        for row in data {
            if row.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: row.len(),
                });
            }
        }

        let n = data.len() as f64;
        let mut means = vec![0.0; d];
        for row in data {
            for (m, x) in means.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut scales = vec![0.0; d];
        for row in data {
            for j in 0..d {
                let diff = row[j] - means[j];
                scales[j] += diff * diff;
            }
        }
        for s in &mut scales {
            let std = (*s / n).sqrt();
            *s = if std > 0.0 { std } else { 1.0 };
        }

        self.means = means;
        self.scales = scales;
        Ok(data.iter().map(|row| self.transform_row(row)).collect())
    }

    /// Map standardized rows back to original units.
    ///
    /// Returns [`Error::NotFitted`] before the first `fit_transform`.
    pub fn inverse_transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if self.means.is_empty() {
            return Err(Error::NotFitted);
        }
        let d = self.means.len();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: row.len(),
                });
            }
            out.push(
                row.iter()
                    .zip(self.scales.iter().zip(&self.means))
                    .map(|(x, (s, m))| x * s + m)
                    .collect(),
            );
        }
        Ok(out)
    }

    fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.scales.iter().zip(&self.means))
            .map(|(x, (s, m))| (x - m) / s)
            .collect()
    }
}
