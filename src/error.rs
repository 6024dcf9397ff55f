// 🚨 Error taxonomy
// Fatal configuration errors abort a run. Normalization errors are local to
// one (source, entity) and end up as coverage gaps, never as aborted runs.

use thiserror::Error;

/// Configuration is inconsistent; there is no safe partial result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Precedence list is empty")]
    EmptyPrecedence,

    #[error("Source listed twice in precedence: {0}")]
    DuplicateSource(String),

    #[error("Unrecognized source in precedence (no normalization table): {0}")]
    UnknownSource(String),

    #[error("No fiscal years configured")]
    NoFiscalYears,

    #[error("Invalid threshold {name}: {value}")]
    InvalidThreshold { name: String, value: f64 },

    #[error("Unrecognized unit: {0}")]
    UnknownUnit(String),

    #[error("Unrecognized field: {0}")]
    UnknownField(String),

    #[error("Peer declared twice: {0}")]
    DuplicatePeer(String),
}

/// A single raw record could not be normalized.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("{source_id}/{entity}: unrecognized unit '{unit}' on field '{field}'")]
    UnknownUnit {
        source_id: String,
        entity: String,
        field: String,
        unit: String,
    },
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
