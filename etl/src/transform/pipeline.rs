//! High-level pipeline API: sources to staging store to delimited outputs.
//!
//! This module combines all steps of a run:
//! schema building, extraction, bulk load, and the two exports.
//!
//! # Example
//!
//! ```rust,ignore
//! use batchload::{run_pipeline, PipelineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_file(Path::new("batchload.json"))?;
//!     let report = run_pipeline(&config).await?;
//!
//!     println!("Loaded {} rows", report.load.inserted);
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::task::JoinError;

use crate::config::PipelineConfig;
use crate::error::{EtlError, EtlResult};
use crate::logs::{log_error, log_info, log_info_indent, log_success, log_warning};
use crate::models::SchemaSpec;
use crate::parser::{chain_sources, Source};
use crate::sink::RecordSink;
use crate::store::{open_store, open_store_read_only, Aggregator, BulkLoader, LoadReport, QueryShape};
use crate::validation::validate_field_names;

/// Result of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Storage column names, dimensions first
    pub columns: Vec<String>,

    /// Load statistics
    pub load: LoadReport,

    /// Records written to the basic output
    pub basic_rows: usize,

    /// Records written to the advanced output
    pub advanced_rows: usize,

    pub basic_output: PathBuf,

    pub advanced_output: PathBuf,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    /// Wall-clock duration of the run in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Run the whole pipeline described by `config`.
///
/// It:
/// 1. Validates the config and builds the schema
/// 2. Drains every source, in order, into a fresh staging table
/// 3. Runs the basic and advanced queries concurrently, each on its own
///    read-only connection, appending to the two outputs
///
/// The load is finished (last batch committed) before either query starts.
pub async fn run_pipeline(config: &PipelineConfig) -> EtlResult<PipelineReport> {
    let started_at = Utc::now();

    // Step 1: Schema
    config.validate()?;
    log_info("📐 Building schema...");
    let schema = config.build_schema()?;
    validate_field_names(&schema)?;
    log_success(format!(
        "{} dimensions, {} measures",
        schema.dimension_names().len(),
        schema.measure_names().len()
    ));
    let advanced_header = schema.with_aliased_measures(&config.measure_alias)?;
    let sources = config.open_sources()?;
    let output_delimiter = config.output_delimiter_byte()?;

    if config.fresh_outputs {
        remove_if_exists(&config.basic_output)?;
        remove_if_exists(&config.advanced_output)?;
    }

    // Step 2: Load
    log_info(format!("📥 Loading {} source(s)...", sources.len()));
    let load = {
        let database = config.database.clone();
        let table = config.table.clone();
        let batch_size = config.batch_size;
        let schema = schema.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            load_sources(&database, &table, batch_size, &schema, sources)
        })
        .await
        .map_err(task_error)?;
        match loaded {
            Ok(report) => report,
            Err(e) => {
                log_error(format!("Load stopped: {e}"));
                return Err(e);
            }
        }
    };
    if load.skipped > 0 {
        log_warning(format!("{} row(s) skipped by validation", load.skipped));
    }
    log_success(load.summary());

    // Step 3: Export
    log_info("📤 Exporting query results...");
    let basic_sink = RecordSink::new(
        &config.basic_output,
        output_delimiter,
        schema.all_names().to_vec(),
    );
    let advanced_sink = RecordSink::new(
        &config.advanced_output,
        output_delimiter,
        advanced_header.all_names().to_vec(),
    );

    let basic = spawn_export(config, &schema, QueryShape::Basic, basic_sink);
    let advanced = spawn_export(config, &schema, QueryShape::Advanced, advanced_sink);
    let (basic, advanced) = tokio::join!(basic, advanced);
    let basic_rows = basic.map_err(task_error)??;
    let advanced_rows = advanced.map_err(task_error)??;

    log_success(format!(
        "Wrote {} basic and {} advanced rows",
        basic_rows, advanced_rows
    ));

    Ok(PipelineReport {
        columns: schema.all_names().to_vec(),
        load,
        basic_rows,
        advanced_rows,
        basic_output: config.basic_output.clone(),
        advanced_output: config.advanced_output.clone(),
        started_at,
        finished_at: Utc::now(),
    })
}

/// Recreate the staging table and drain `sources` into it.
pub fn load_sources(
    database: &Path,
    table: &str,
    batch_size: usize,
    schema: &SchemaSpec,
    sources: Vec<Source>,
) -> EtlResult<LoadReport> {
    let conn = open_store(database)?;
    let loader = BulkLoader::new(&conn)
        .with_table(table)?
        .with_batch_size(batch_size);
    loader.create_table(schema)?;
    loader.write(schema, chain_sources(sources, schema))
}

/// Run one query shape and append its rows to `sink`.
///
/// The sink's default header is used.
pub fn export_query(
    database: &Path,
    table: &str,
    shape: QueryShape,
    schema: &SchemaSpec,
    sink: &RecordSink,
) -> EtlResult<usize> {
    let conn = open_store_read_only(database)?;
    let aggregator = Aggregator::new(&conn).with_table(table)?;
    let mut query = aggregator.query(shape, schema)?;
    let written = sink.write(None, query.records()?)?;
    log_info_indent(
        format!("{} → {} ({} rows)", shape.as_str(), sink.path().display(), written),
        1,
    );
    Ok(written)
}

fn spawn_export(
    config: &PipelineConfig,
    schema: &SchemaSpec,
    shape: QueryShape,
    sink: RecordSink,
) -> tokio::task::JoinHandle<EtlResult<usize>> {
    let database = config.database.clone();
    let table = config.table.clone();
    let schema = schema.clone();
    tokio::task::spawn_blocking(move || export_query(&database, &table, shape, &schema, &sink))
}

fn remove_if_exists(path: &Path) -> EtlResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn task_error(err: JoinError) -> EtlError {
    EtlError::Task(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchemaConfig, SourceConfig};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn rule_config(dir: &TempDir, sources: Vec<SourceConfig>) -> PipelineConfig {
        PipelineConfig::new(
            SchemaConfig::Rule {
                dimension_prefix: "D".into(),
                dimension_count: 3,
                measure_prefix: "M".into(),
                measure_count: 3,
            },
            sources,
            dir.path().join("stage.db"),
            dir.path().join("out/basic.tsv"),
            dir.path().join("out/advanced.tsv"),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_rule_schema() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.csv");
        fs::write(&input, "D1,D2,D3,M1,M2,M3\na,b,c,1,2,3\na,b,c,4,5,6\n").unwrap();

        let config = rule_config(&dir, vec![SourceConfig::new(&input)]);
        let report = run_pipeline(&config).await.unwrap();

        assert_eq!(report.load.inserted, 2);
        assert_eq!(report.basic_rows, 2);
        assert_eq!(report.advanced_rows, 1);
        assert_eq!(
            fs::read_to_string(&config.basic_output).unwrap(),
            "D1\tD2\tD3\tM1\tM2\tM3\na\tb\tc\t1\t2\t3\na\tb\tc\t4\t5\t6\n"
        );
        assert_eq!(
            fs::read_to_string(&config.advanced_output).unwrap(),
            "D1\tD2\tD3\tMS1\tMS2\tMS3\na\tb\tc\t5\t7\t9\n"
        );
    }

    #[tokio::test]
    async fn test_mixed_formats_and_skipped_row() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("part1.csv");
        let xml = dir.path().join("part2.xml");
        let json = dir.path().join("part3.json");
        fs::write(&csv, "D1,D2,D3,M1,M2,M3\nb,x,y,1,1,1\nbad;,x,y,9,9,9\n").unwrap();
        fs::write(
            &xml,
            r#"<data><objects>
                <object name="D1"><value>a</value></object>
                <object name="D2"><value>x</value></object>
                <object name="D3"><value>y</value></object>
                <object name="M1"><value>2</value></object>
                <object name="M2"><value>2</value></object>
                <object name="M3"><value>2</value></object>
            </objects></data>"#,
        )
        .unwrap();
        fs::write(
            &json,
            r#"[{"D1":"b","D2":"x","D3":"y","M1":10,"M2":10,"M3":10}]"#,
        )
        .unwrap();

        let config = rule_config(
            &dir,
            vec![
                SourceConfig::new(&csv),
                SourceConfig::new(&xml),
                SourceConfig::new(&json),
            ],
        );
        let report = run_pipeline(&config).await.unwrap();

        assert_eq!(report.load.rows_read, 4);
        assert_eq!(report.load.skipped, 1);
        let basic = fs::read_to_string(&config.basic_output).unwrap();
        let lines: Vec<&str> = basic.lines().collect();
        assert_eq!(
            lines,
            vec![
                "D1\tD2\tD3\tM1\tM2\tM3",
                "a\tx\ty\t2\t2\t2",
                "b\tx\ty\t1\t1\t1",
                "b\tx\ty\t10\t10\t10",
            ]
        );
        let advanced = fs::read_to_string(&config.advanced_output).unwrap();
        assert!(advanced.ends_with("a\tx\ty\t2\t2\t2\nb\tx\ty\t11\t11\t11\n"));
    }

    #[tokio::test]
    async fn test_outputs_append_unless_fresh() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.csv");
        fs::write(&input, "D1,D2,D3,M1,M2,M3\na,b,c,1,2,3\n").unwrap();

        let mut config = rule_config(&dir, vec![SourceConfig::new(&input)]);
        run_pipeline(&config).await.unwrap();
        run_pipeline(&config).await.unwrap();
        let twice = fs::read_to_string(&config.basic_output).unwrap();
        assert_eq!(twice.lines().count(), 4);

        config.fresh_outputs = true;
        run_pipeline(&config).await.unwrap();
        let once = fs::read_to_string(&config.basic_output).unwrap();
        assert_eq!(once.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_format_error_aborts_before_export() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.csv");
        fs::write(&input, "D1,D2,M1,M2,M3\na,b,1,2,3\n").unwrap();

        let config = rule_config(&dir, vec![SourceConfig::new(&input)]);
        let err = run_pipeline(&config).await.unwrap_err();

        assert!(matches!(err, EtlError::Format(_)));
        assert!(!config.basic_output.exists());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = rule_config(&dir, vec![SourceConfig::new("in.csv")]);
        config.batch_size = 0;

        let err = run_pipeline(&config).await.unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[tokio::test]
    async fn test_in_memory_store_is_rejected_before_load() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.csv");
        fs::write(&input, "D1,D2,D3,M1,M2,M3\na,b,c,1,2,3\n").unwrap();

        let mut config = rule_config(&dir, vec![SourceConfig::new(&input)]);
        config.database = PathBuf::from(":memory:");

        let err = run_pipeline(&config).await.unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
        assert!(!config.basic_output.exists());
    }
}
