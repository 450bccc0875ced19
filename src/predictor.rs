use crate::error::ModelError;
use crate::models::{FeatureRow, FeatureTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const FEATURE_COUNT: usize = 4;

/// Ordinary least-squares model artifact: `intercept + coefficients . x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: [f64; FEATURE_COUNT],
}

impl LinearModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::MissingArtifact {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|err| ModelError::InvalidArtifact {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let model: LinearModel =
            serde_json::from_str(&text).map_err(|err| ModelError::InvalidArtifact {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        if !model.intercept.is_finite() || model.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::InvalidArtifact {
                path: path.to_path_buf(),
                message: "model parameters must be finite".to_string(),
            });
        }
        Ok(model)
    }

    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features.as_array())
                .map(|(weight, value)| weight * value)
                .sum::<f64>()
    }
}

/// Regression inputs, in the column order the models were fitted with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub days_since_high_last: f64,
    pub pct_diff_from_high_last: f64,
    pub days_since_low_last: f64,
    pub pct_diff_from_low_last: f64,
}

impl FeatureVector {
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self {
            days_since_high_last: values[0],
            pct_diff_from_high_last: values[1],
            days_since_low_last: values[2],
            pct_diff_from_low_last: values[3],
        }
    }

    /// `None` when any input is undefined or not finite.
    pub fn from_row(row: &FeatureRow) -> Option<Self> {
        let vector = Self {
            days_since_high_last: row.days_since_high_last? as f64,
            pct_diff_from_high_last: row.pct_diff_from_high_last?,
            days_since_low_last: row.days_since_low_last? as f64,
            pct_diff_from_low_last: row.pct_diff_from_low_last?,
        };
        vector
            .as_array()
            .iter()
            .all(|value| value.is_finite())
            .then_some(vector)
    }

    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.days_since_high_last,
            self.pct_diff_from_high_last,
            self.days_since_low_last,
            self.pct_diff_from_low_last,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted % difference between close and the high of the next F days.
    pub pct_diff_from_high_next: f64,
    /// Predicted % difference between close and the low of the next F days.
    pub pct_diff_from_low_next: f64,
}

/// The high-target and low-target models, loaded together.
#[derive(Debug, Clone)]
pub struct ModelPair {
    pub high: LinearModel,
    pub low: LinearModel,
}

impl ModelPair {
    /// Checks both artifacts exist before parsing either, so a missing file is reported up front.
    pub fn load(high_path: &Path, low_path: &Path) -> Result<Self, ModelError> {
        let missing: Option<PathBuf> = [high_path, low_path]
            .iter()
            .find(|path| !path.exists())
            .map(|path| path.to_path_buf());
        if let Some(path) = missing {
            return Err(ModelError::MissingArtifact { path });
        }
        Ok(Self {
            high: LinearModel::load(high_path)?,
            low: LinearModel::load(low_path)?,
        })
    }

    pub fn predict(&self, features: &FeatureVector) -> Prediction {
        Prediction {
            pct_diff_from_high_next: self.high.predict(features),
            pct_diff_from_low_next: self.low.predict(features),
        }
    }
}

/// The most recent row of `symbol` whose regression inputs are all defined.
pub fn latest_complete_row<'a>(table: &'a FeatureTable, symbol: &'a str) -> Option<&'a FeatureRow> {
    table
        .rows_for_symbol(symbol)
        .filter(|row| FeatureVector::from_row(row).is_some())
        .last()
}
