//! # Batchload - staged batch ETL for tabular files
//!
//! Batchload reads records from CSV, XML and JSON files, normalizes them to
//! one fixed-width shape, stages them in SQLite in bounded batches, and
//! exports two aggregations as delimited text.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ CSV/XML/JSON│────▶│   Sources   │────▶│ BulkLoader  │────▶│   SQLite    │
//! │   files     │     │ (lazy, pull)│     │ (batched tx)│     │  staging    │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                                    │
//!                     ┌─────────────┐     ┌─────────────┐            │
//!                     │ basic.tsv   │◀────│ Aggregator  │◀───────────┘
//!                     │ advanced.tsv│     │ (2 queries) │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use batchload::{run_pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PipelineConfig::from_file("batchload.json".as_ref()).unwrap();
//!     let report = run_pipeline(&config).await.unwrap();
//!     println!("Inserted {} rows", report.load.inserted);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Domain models (SchemaSpec, Record)
//! - [`parser`] - CSV, XML and JSON record sources
//! - [`validation`] - SQL blocklist checks for names and rows
//! - [`store`] - SQLite staging: bulk loader and aggregator
//! - [`sink`] - Delimited text output
//! - [`config`] - Pipeline configuration
//! - [`transform`] - Pipeline orchestration
//! - [`logs`] - Log broadcasting

// Core modules
pub mod error;
pub mod models;

// Extraction
pub mod parser;

// Validation
pub mod validation;

// Staging and output
pub mod sink;
pub mod store;

// Orchestration
pub mod config;
pub mod transform;

// Logging
pub mod logs;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    EtlError,
    EtlResult,
    FormatError,
    SchemaError,
    StorageError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{Record, SchemaSpec};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{
    validate_field_names,
    validate_name,
    validate_row,
    ValidationSkip,
    SQL_BLOCKLIST,
};

// =============================================================================
// Re-exports - Sources
// =============================================================================

pub use parser::{
    chain_sources,
    open_source,
    CsvSource,
    JsonSource,
    RecordSource,
    Source,
    SourceFormat,
    XmlSource,
};

// =============================================================================
// Re-exports - Store
// =============================================================================

pub use store::{
    open_store,
    open_store_read_only,
    Aggregator,
    BulkLoader,
    LoadReport,
    QueryShape,
};

// =============================================================================
// Re-exports - Sink
// =============================================================================

pub use sink::RecordSink;

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use config::{PipelineConfig, SchemaConfig, SourceConfig};

pub use transform::pipeline::{
    export_query,
    load_sources,
    run_pipeline,
    PipelineReport,
};
