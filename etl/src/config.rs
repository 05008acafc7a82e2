//! Pipeline configuration.
//!
//! A [`PipelineConfig`] describes one run: how the schema is obtained, which
//! files to read, where to stage and where to write. It is usually loaded
//! from a JSON file; the CLI can also assemble one from flags.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::{ConfigError, ConfigResult, EtlResult, FormatError};
use crate::models::SchemaSpec;
use crate::parser::{open_source, Source, SourceFormat};
use crate::sink::DEFAULT_OUTPUT_DELIMITER;
use crate::store::{DEFAULT_BATCH_SIZE, DEFAULT_TABLE};
use crate::validation::validate_name;

// ============================================================================
// Defaults
// ============================================================================

/// Environment variable that may supply the staging database path.
pub const DATABASE_ENV: &str = "BATCHLOAD_DATABASE";

/// Prefix used for measure names in the advanced output header.
pub const DEFAULT_MEASURE_ALIAS: &str = "MS";

fn default_csv_delimiter() -> char {
    ','
}

fn default_output_delimiter() -> char {
    DEFAULT_OUTPUT_DELIMITER as char
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_measure_alias() -> String {
    DEFAULT_MEASURE_ALIAS.to_string()
}

fn default_dimension_prefix() -> String {
    "D".to_string()
}

fn default_measure_prefix() -> String {
    "M".to_string()
}

// ============================================================================
// Schema and sources
// ============================================================================

/// How the record shape is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaConfig {
    /// Names given as-is.
    Explicit {
        dimensions: Vec<String>,
        #[serde(default)]
        measures: Vec<String>,
    },
    /// `prefix1..prefixN` names.
    Rule {
        #[serde(default = "default_dimension_prefix")]
        dimension_prefix: String,
        dimension_count: i64,
        #[serde(default = "default_measure_prefix")]
        measure_prefix: String,
        measure_count: i64,
    },
    /// Names taken from a CSV header line.
    CsvHeading {
        path: PathBuf,
        #[serde(default = "default_dimension_prefix")]
        dimension_prefix: String,
        #[serde(default = "default_measure_prefix")]
        measure_prefix: String,
    },
}

/// One input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    /// Detected from the extension when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SourceFormat>,
}

impl SchemaConfig {
    /// Build the schema. `delimiter` is only used to read a CSV heading.
    pub fn build(&self, delimiter: u8) -> EtlResult<SchemaSpec> {
        match self {
            Self::Explicit {
                dimensions,
                measures,
            } => Ok(SchemaSpec::from_explicit(
                dimensions.iter().cloned(),
                measures.iter().cloned(),
            )?),
            Self::Rule {
                dimension_prefix,
                dimension_count,
                measure_prefix,
                measure_count,
            } => Ok(SchemaSpec::from_rule(
                dimension_prefix,
                *dimension_count,
                measure_prefix,
                *measure_count,
            )?),
            Self::CsvHeading {
                path,
                dimension_prefix,
                measure_prefix,
            } => SchemaSpec::from_csv_heading(path, delimiter, dimension_prefix, measure_prefix),
        }
    }
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
        }
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

/// Everything a pipeline run needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub schema: SchemaConfig,

    /// Read in order, as one sequence.
    pub sources: Vec<SourceConfig>,

    /// Field separator of CSV inputs.
    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: char,

    /// Field separator of both outputs.
    #[serde(default = "default_output_delimiter")]
    pub output_delimiter: char,

    /// Staging SQLite file.
    pub database: PathBuf,

    #[serde(default = "default_table")]
    pub table: String,

    /// Rows per committed transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    pub basic_output: PathBuf,

    pub advanced_output: PathBuf,

    /// Measure prefix in the advanced output header.
    #[serde(default = "default_measure_alias")]
    pub measure_alias: String,

    /// Remove both outputs before writing instead of appending.
    #[serde(default)]
    pub fresh_outputs: bool,
}

impl PipelineConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// A config with defaults for everything but the essentials.
    pub fn new(
        schema: SchemaConfig,
        sources: Vec<SourceConfig>,
        database: impl Into<PathBuf>,
        basic_output: impl Into<PathBuf>,
        advanced_output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            schema,
            sources,
            csv_delimiter: default_csv_delimiter(),
            output_delimiter: default_output_delimiter(),
            database: database.into(),
            table: default_table(),
            batch_size: default_batch_size(),
            basic_output: basic_output.into(),
            advanced_output: advanced_output.into(),
            measure_alias: default_measure_alias(),
            fresh_outputs: false,
        }
    }

    /// Sample configuration printed by `batchload init-config`.
    pub fn example() -> Self {
        Self::new(
            SchemaConfig::Rule {
                dimension_prefix: default_dimension_prefix(),
                dimension_count: 3,
                measure_prefix: default_measure_prefix(),
                measure_count: 3,
            },
            vec![
                SourceConfig::new("data/input.csv"),
                SourceConfig::new("data/input.xml"),
                SourceConfig::new("data/input.json"),
            ],
            "data/staging.db",
            "out/basic_results.tsv",
            "out/advanced_results.tsv",
        )
    }

    /// Check settings that serde cannot.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::invalid("sources", "at least one input is required"));
        }
        delimiter_byte("csv_delimiter", self.csv_delimiter)?;
        delimiter_byte("output_delimiter", self.output_delimiter)?;
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::invalid("database", "path is empty"));
        }
        // Exports open their own connections, which cannot see a private in-memory store
        if is_in_memory(&self.database) {
            return Err(ConfigError::invalid(
                "database",
                "an in-memory store cannot be shared with the export workers; use a file path",
            ));
        }
        validate_name(&self.table).map_err(|e| ConfigError::invalid("table", e.to_string()))?;
        if self.measure_alias.is_empty() {
            return Err(ConfigError::invalid("measure_alias", "must not be empty"));
        }
        validate_name(&self.measure_alias)
            .map_err(|e| ConfigError::invalid("measure_alias", e.to_string()))?;
        if output_target(&self.basic_output) == output_target(&self.advanced_output) {
            return Err(ConfigError::invalid(
                "advanced_output",
                "must differ from basic_output",
            ));
        }
        Ok(())
    }

    pub fn csv_delimiter_byte(&self) -> ConfigResult<u8> {
        delimiter_byte("csv_delimiter", self.csv_delimiter)
    }

    pub fn output_delimiter_byte(&self) -> ConfigResult<u8> {
        delimiter_byte("output_delimiter", self.output_delimiter)
    }

    /// Build the schema this config describes.
    pub fn build_schema(&self) -> EtlResult<SchemaSpec> {
        self.schema.build(self.csv_delimiter_byte()?)
    }

    /// Build a reader per configured input, in order.
    pub fn open_sources(&self) -> EtlResult<Vec<Source>> {
        let delimiter = self.csv_delimiter_byte()?;
        self.sources
            .iter()
            .map(|s| open_source(&s.path, s.format, delimiter))
            .collect::<Result<Vec<_>, FormatError>>()
            .map_err(Into::into)
    }
}

/// SQLite names for a connection-private database.
fn is_in_memory(path: &Path) -> bool {
    let text = path.to_string_lossy();
    text == ":memory:"
        || text.starts_with("file::memory:")
        || (text.starts_with("file:") && text.contains("mode=memory"))
}

/// Absolute, dot-free form of an output path, with the parent directory
/// resolved through symlinks when it already exists.
fn output_target(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other),
        }
    }

    let resolved = match (lexical.parent(), lexical.file_name()) {
        (Some(parent), Some(name)) => parent.canonicalize().ok().map(|p| p.join(name)),
        _ => None,
    };
    resolved.unwrap_or(lexical)
}

fn delimiter_byte(field: &'static str, c: char) -> ConfigResult<u8> {
    if c.is_ascii() && c != '"' && c != '\n' && c != '\r' {
        Ok(c as u8)
    } else {
        Err(ConfigError::invalid(
            field,
            format!("{c:?} is not a usable single-byte delimiter"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"{
        "schema": {"kind": "rule", "dimension_count": 3, "measure_count": 3},
        "sources": [{"path": "a.csv"}, {"path": "b.dat", "format": "json"}],
        "database": "stage.db",
        "basic_output": "basic.tsv",
        "advanced_output": "advanced.tsv"
    }"#;

    #[test]
    fn test_defaults_applied() {
        let config: PipelineConfig = serde_json::from_str(MINIMAL).unwrap();
        assert_eq!(config.csv_delimiter, ',');
        assert_eq!(config.output_delimiter, '\t');
        assert_eq!(config.table, "important_data");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.measure_alias, "MS");
        assert!(!config.fresh_outputs);
        assert_eq!(config.sources[1].format, Some(SourceFormat::Json));
        assert!(config.validate().is_ok());

        let schema = config.build_schema().unwrap();
        assert_eq!(schema.all_names(), ["D1", "D2", "D3", "M1", "M2", "M3"]);
    }

    #[test]
    fn test_explicit_schema() {
        let json = r#"{"kind": "explicit", "dimensions": ["city"], "measures": ["sales"]}"#;
        let schema: SchemaConfig = serde_json::from_str(json).unwrap();
        let mut config = PipelineConfig::example();
        config.schema = schema;

        let schema = config.build_schema().unwrap();
        assert_eq!(schema.all_names(), ["city", "sales"]);
    }

    #[test]
    fn test_csv_heading_schema() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "D1;M1;other").unwrap();

        let mut config = PipelineConfig::example();
        config.csv_delimiter = ';';
        config.schema = SchemaConfig::CsvHeading {
            path: file.path().to_path_buf(),
            dimension_prefix: "D".into(),
            measure_prefix: "M".into(),
        };
        let schema = config.build_schema().unwrap();
        assert_eq!(schema.all_names(), ["D1", "M1"]);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = PipelineConfig::example();
        config.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "batch_size", .. })
        ));

        let mut config = PipelineConfig::example();
        config.sources.clear();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::example();
        config.table = "data; DROP".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "table", .. })
        ));

        let mut config = PipelineConfig::example();
        config.output_delimiter = 'é';
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::example();
        config.advanced_output = config.basic_output.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_in_memory_database_is_rejected() {
        for memory in [":memory:", "file::memory:?cache=shared", "file:stage?mode=memory"] {
            let mut config = PipelineConfig::example();
            config.database = PathBuf::from(memory);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid { field: "database", .. })
            ));
        }

        let mut config = PipelineConfig::example();
        config.database = PathBuf::from("memory.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_outputs_compared_after_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut config = PipelineConfig::example();
        config.basic_output = out.join("a.tsv");
        config.advanced_output = out.join(".").join("a.tsv");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "advanced_output", .. })
        ));

        config.advanced_output = out.join("sub").join("..").join("a.tsv");
        assert!(config.validate().is_err());

        config.basic_output = PathBuf::from("out/a.tsv");
        config.advanced_output = PathBuf::from("./out/a.tsv");
        assert!(config.validate().is_err());

        config.advanced_output = out.join("b.tsv");
        config.basic_output = out.join("a.tsv");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_schema_config_build_uses_delimiter() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "D1|M1").unwrap();
        let heading = SchemaConfig::CsvHeading {
            path: file.path().to_path_buf(),
            dimension_prefix: "D".into(),
            measure_prefix: "M".into(),
        };
        assert_eq!(heading.build(b'|').unwrap().all_names(), ["D1", "M1"]);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{MINIMAL}").unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database, PathBuf::from("stage.db"));

        let missing = PipelineConfig::from_file(Path::new("/nonexistent/batchload.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_example_round_trips_through_json() {
        let example = PipelineConfig::example();
        assert!(example.validate().is_ok());
        let json = serde_json::to_string_pretty(&example).unwrap();
        assert!(json.contains("\"kind\": \"rule\""));
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, example);
    }
}
