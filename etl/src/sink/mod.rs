//! Delimited text output.
//!
//! A [`RecordSink`] appends one header line and one line per record to its
//! target file. Existing content is never truncated: writing twice to the
//! same path leaves two header+body blocks.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::EtlResult;
use crate::models::Record;

/// Default output field separator.
pub const DEFAULT_OUTPUT_DELIMITER: u8 = b'\t';

/// Appending writer for one output file.
#[derive(Debug, Clone)]
pub struct RecordSink {
    path: PathBuf,
    delimiter: u8,
    default_header: Vec<String>,
}

impl RecordSink {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8, default_header: Vec<String>) -> Self {
        Self {
            path: path.into(),
            delimiter,
            default_header,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `header` (or the default header) and every record.
    ///
    /// Fields holding the delimiter, quotes or line breaks are quoted.
    /// Returns how many records were written. The first record error stops
    /// the write; lines already flushed stay in the file.
    pub fn write<I>(&self, header: Option<&[String]>, records: I) -> EtlResult<usize>
    where
        I: IntoIterator<Item = EtlResult<Record>>,
    {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_writer(file);

        writer.write_record(header.unwrap_or(self.default_header.as_slice()))?;

        let mut written = 0;
        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    writer.flush()?;
                    return Err(e);
                }
            };
            writer.write_record(record.values())?;
            written += 1;
        }

        writer.flush()?;
        Ok(written)
    }
}
