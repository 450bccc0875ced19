use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while retrieving a symbol's history.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport error or non-success status. Retried up to the configured budget.
    #[error("transient fetch failure for {symbol}: {message}")]
    Transient { symbol: String, message: String },

    /// The upstream payload broke the API contract. Never retried.
    #[error("malformed response for {symbol}: {message}")]
    MalformedResponse { symbol: String, message: String },

    #[error("no data available for {symbol} after {attempts} attempt(s): {reason}")]
    DataUnavailable {
        symbol: String,
        attempts: u32,
        reason: String,
    },
}

impl FetchError {
    pub fn transient(symbol: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(symbol: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Transient { symbol, .. }
            | Self::MalformedResponse { symbol, .. }
            | Self::DataUnavailable { symbol, .. } => symbol,
        }
    }
}

/// Failures loading a regression model artifact.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("invalid model artifact {}: {message}", path.display())]
    InvalidArtifact { path: PathBuf, message: String },
}

/// Failures writing or reading the tabular export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected header layout: {0}")]
    Header(String),

    #[error("invalid value {value:?} in column {column} at row {row}")]
    Cell {
        row: usize,
        column: String,
        value: String,
    },
}
