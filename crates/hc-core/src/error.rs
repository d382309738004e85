//! Error types for hepconv.

use thiserror::Error;

/// Errors raised by the merge/aggregate engine and its container backends.
#[derive(Error, Debug)]
pub enum Error {
    /// Conflicting or missing options. Raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing or unreadable source, or an unresolved table/column name.
    #[error("not found: {0}")]
    NotFound(String),

    /// A column layout the engine cannot regroup (e.g. split leaves).
    #[error("unsupported structure: {0}")]
    UnsupportedStructure(String),

    /// Histogram binning or table structure disagreement.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Destination exists without force, or append target is missing.
    #[error("destination state: {0}")]
    DestinationState(String),

    /// Cut expression parse or evaluation error.
    #[error("expression error: {0}")]
    Expression(String),

    /// Compression block encode/decode failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Arrow error.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl Error {
    /// Short, stable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::NotFound(_) => "not_found",
            Error::UnsupportedStructure(_) => "unsupported_structure",
            Error::SchemaMismatch(_) => "schema_mismatch",
            Error::DestinationState(_) => "destination_state",
            Error::Expression(_) => "expression",
            Error::Codec(_) => "codec",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Arrow(_) => "arrow",
            Error::Parquet(_) => "parquet",
        }
    }
}

/// Result type alias for hepconv operations.
pub type Result<T> = std::result::Result<T, Error>;
