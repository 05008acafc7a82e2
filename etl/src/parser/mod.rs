//! Format-specific record readers.
//!
//! Every reader implements [`RecordSource`]: given a [`SchemaSpec`] it yields
//! a lazy, single-pass sequence of [`Record`]s in `all_names()` order,
//! dropping any field the schema does not name.
//!
//! ```text
//! ┌──────────┐
//! │ CSV file │──┐
//! └──────────┘  │   ┌──────────────┐     ┌─────────────────────────┐
//! ┌──────────┐  ├──▶│ RecordSource │────▶│ Iterator<Result<Record>>│
//! │ XML file │──┤   └──────────────┘     └─────────────────────────┘
//! └──────────┘  │
//! ┌──────────┐  │
//! │JSON file │──┘
//! └──────────┘
//! ```
//!
//! Use [`Source`] when the format is only known at runtime, and
//! [`chain_sources`] to read several files as one sequence.

mod csv_source;
mod json_source;
mod xml_source;

pub use csv_source::{CsvRecords, CsvSource};
pub use json_source::{value_to_text, JsonRecords, JsonSource, PREFIX_SCAN_LIMIT};
pub use xml_source::{XmlRecords, XmlSource};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EtlResult, FormatError};
use crate::logs::log_info_indent;
use crate::models::{Record, SchemaSpec};

/// Something that can be opened into a stream of records.
///
/// Consuming `self` makes every source single-pass: reading a file twice
/// means building a second source.
pub trait RecordSource {
    type Records: Iterator<Item = EtlResult<Record>>;

    fn records(self, schema: &SchemaSpec) -> EtlResult<Self::Records>;
}

// =============================================================================
// Runtime format selection
// =============================================================================

/// Input file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Xml,
    Json,
}

impl SourceFormat {
    /// Guess the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Csv),
            "xml" => Some(Self::Xml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xml => "xml",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xml" => Ok(Self::Xml),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}' (expected csv, xml or json)")),
        }
    }
}

/// Any of the three readers.
#[derive(Debug, Clone)]
pub enum Source {
    Csv(CsvSource),
    Xml(XmlSource),
    Json(JsonSource),
}

impl Source {
    pub fn path(&self) -> &Path {
        match self {
            Self::Csv(s) => s.path(),
            Self::Xml(s) => s.path(),
            Self::Json(s) => s.path(),
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            Self::Csv(_) => SourceFormat::Csv,
            Self::Xml(_) => SourceFormat::Xml,
            Self::Json(_) => SourceFormat::Json,
        }
    }
}

/// Build the reader for `path`, detecting the format from the extension
/// unless `format` is given. `delimiter` only applies to CSV.
pub fn open_source(
    path: impl Into<PathBuf>,
    format: Option<SourceFormat>,
    delimiter: u8,
) -> Result<Source, FormatError> {
    let path = path.into();
    let format = match format.or_else(|| SourceFormat::from_path(&path)) {
        Some(format) => format,
        None => {
            return Err(FormatError::new(
                &path,
                "cannot tell the format from the extension; set it explicitly",
            ))
        }
    };

    Ok(match format {
        SourceFormat::Csv => Source::Csv(CsvSource::new(path, delimiter)),
        SourceFormat::Xml => Source::Xml(XmlSource::new(path)),
        SourceFormat::Json => Source::Json(JsonSource::new(path)),
    })
}

/// Records of a [`Source`].
pub enum SourceRecords {
    Csv(CsvRecords),
    Xml(XmlRecords),
    Json(JsonRecords),
}

impl RecordSource for Source {
    type Records = SourceRecords;

    fn records(self, schema: &SchemaSpec) -> EtlResult<SourceRecords> {
        Ok(match self {
            Self::Csv(s) => SourceRecords::Csv(s.records(schema)?),
            Self::Xml(s) => SourceRecords::Xml(s.records(schema)?),
            Self::Json(s) => SourceRecords::Json(s.records(schema)?),
        })
    }
}

impl Iterator for SourceRecords {
    type Item = EtlResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Csv(r) => r.next(),
            Self::Xml(r) => r.next(),
            Self::Json(r) => r.next(),
        }
    }
}

// =============================================================================
// Concatenation
// =============================================================================

/// Read `sources` one after another as a single sequence.
///
/// A source is opened only once the previous one is drained. The first
/// error ends the whole sequence.
pub fn chain_sources(sources: Vec<Source>, schema: &SchemaSpec) -> ChainedRecords {
    ChainedRecords {
        pending: sources.into_iter(),
        current: None,
        schema: schema.clone(),
    }
}

/// Iterator returned by [`chain_sources`].
pub struct ChainedRecords {
    pending: std::vec::IntoIter<Source>,
    current: Option<SourceRecords>,
    schema: SchemaSpec,
}

impl ChainedRecords {
    fn stop(&mut self) {
        self.current = None;
        self.pending = Vec::new().into_iter();
    }
}

impl Iterator for ChainedRecords {
    type Item = EtlResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(Ok(record)) => return Some(Ok(record)),
                    Some(Err(e)) => {
                        self.stop();
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }

            let source = self.pending.next()?;
            log_info_indent(
                format!("Reading {} ({})", source.path().display(), source.format().as_str()),
                1,
            );
            match source.records(&self.schema) {
                Ok(records) => self.current = Some(records),
                Err(e) => {
                    self.stop();
                    return Some(Err(e));
                }
            }
        }
    }
}
