use std::path::PathBuf;

use thiserror::Error;

/// Failures the screener reports at instrument or batch granularity.
///
/// Empty scan results, zero standard deviations and instruments without a
/// qualifying slot are normal outcomes and never show up here.
#[derive(Debug, Error)]
pub enum ScreenerError {
    #[error("instrument {instrument}: {reason}")]
    Input { instrument: String, reason: String },

    #[error("window start_day={start_day} length={length_days} is outside 1..=365")]
    InvalidWindow { start_day: u16, length_days: u16 },

    #[error("failed to write {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ScreenerError {
    pub fn input(instrument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Input {
            instrument: instrument.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScreenerError>;
