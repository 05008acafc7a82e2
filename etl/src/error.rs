//! Error types for the batchload pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`SchemaError`] - Invalid or unsafe field specifications
//! - [`FormatError`] - An input file does not match its expected shape
//! - [`StorageError`] - Staging store failures
//! - [`ConfigError`] - Invalid pipeline configuration
//! - [`EtlError`] - Top-level orchestration errors
//!
//! Row-level validation failures are not errors: they are reported as
//! [`crate::validation::ValidationSkip`] values and the load continues.
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors raised while building or accepting a schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The same name appears twice in one field group.
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    /// A name is both a dimension and a measure.
    #[error("Field '{0}' is declared as both dimension and measure")]
    OverlappingField(String),

    /// Generation rule with a count of zero or less.
    #[error("Field count for prefix '{prefix}' must be positive, got {count}")]
    NonPositiveCount { prefix: String, count: i64 },

    /// No dimension fields at all.
    #[error("Schema needs at least one dimension field")]
    NoDimensions,

    /// A record does not have one value per schema field.
    #[error("Record has {found} values, schema has {expected} fields")]
    WidthMismatch { expected: usize, found: usize },

    /// A field or table name contains a blocklisted SQL sequence.
    #[error("Unsafe name '{name}': contains '{pattern}'")]
    UnsafeName { name: String, pattern: &'static str },
}

// =============================================================================
// Format Errors
// =============================================================================

/// An input file does not match the shape its reader expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    /// File being read.
    pub path: PathBuf,
    /// 1-based line, when the reader knows it.
    pub line: Option<u64>,
    /// What went wrong.
    pub message: String,
}

impl FormatError {
    pub fn new(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            line: None,
            message: message.into(),
        }
    }

    pub fn with_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}, line {}: {}", self.path.display(), line, self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

impl std::error::Error for FormatError {}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors from the staging store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be opened.
    #[error("Cannot open staging store '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The directory holding the database could not be created.
    #[error("Cannot create staging store directory: {0}")]
    Io(#[from] std::io::Error),

    /// Any statement failure.
    #[error("Staging store error: {0}")]
    Sql(#[from] rusqlite::Error),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Invalid pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::config::PipelineConfig`].
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A setting is out of range or missing.
    #[error("Invalid setting '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline error.
///
/// This is the error type returned by sources, the loader, the aggregator,
/// sinks and [`crate::transform::pipeline::run_pipeline`].
#[derive(Debug, Error)]
pub enum EtlError {
    /// Schema error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Input format error.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Staging store error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Output file error.
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited writer error.
    #[error("Output error: {0}")]
    Csv(#[from] csv::Error),

    /// A background task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for EtlError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sql(err))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for pipeline operations.
pub type EtlResult<T> = Result<T, EtlError>;
