use std::path::PathBuf;

use thiserror::Error;

/// Engine-level error type. Substrate failures propagate; domain diagnostics
/// (missing baselines, no eligible pairs) are accumulated on result objects
/// instead of being raised here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cube table '{table}' does not exist")]
    CubeMissing { table: String },

    #[error("cube database at {} is unreadable: {source}", path.display())]
    CubeUnreadable {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("cube integrity violation: {reason}")]
    CubeIntegrity { reason: String },

    #[error("round '{name}' already exists; pass overwrite=true to replace it")]
    RoundExists { name: String },

    #[error("threshold '{name}' out of range: {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("invalid identifier '{0}': expected lowercase alphanumerics and underscores")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
