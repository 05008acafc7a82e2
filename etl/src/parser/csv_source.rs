//! Delimited-text reader.
//!
//! The first line names the columns; every following line is projected onto
//! the schema by column name, so the input may order or pad its columns
//! freely.

use std::fs::File;
use std::path::{Path, PathBuf};

use super::RecordSource;
use crate::error::{EtlResult, FormatError};
use crate::models::{Record, SchemaSpec};

/// CSV file with a header line.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    delimiter: u8,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for CsvSource {
    type Records = CsvRecords;

    fn records(self, schema: &SchemaSpec) -> EtlResult<CsvRecords> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| FormatError::new(&self.path, format!("cannot open: {e}")))?;

        let headers = reader
            .headers()
            .map_err(|e| FormatError::new(&self.path, format!("cannot read header: {e}")).with_line(1))?
            .clone();

        let positions = schema
            .all_names()
            .iter()
            .map(|name| {
                headers.iter().position(|h| h == name).ok_or_else(|| {
                    FormatError::new(&self.path, format!("header has no column '{name}'")).with_line(1)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CsvRecords {
            header_len: headers.len(),
            rows: reader.into_records(),
            positions,
            path: self.path,
            done: false,
        })
    }
}

/// Lazy rows of a [`CsvSource`].
pub struct CsvRecords {
    path: PathBuf,
    rows: csv::StringRecordsIntoIter<File>,
    positions: Vec<usize>,
    header_len: usize,
    done: bool,
}

impl CsvRecords {
    fn project(&self, row: &csv::StringRecord) -> EtlResult<Record> {
        let line = row.position().map(|p| p.line());
        if row.len() < self.header_len {
            let err = FormatError::new(
                &self.path,
                format!("row has {} fields, header has {}", row.len(), self.header_len),
            );
            return Err(match line {
                Some(line) => err.with_line(line),
                None => err,
            }
            .into());
        }

        let values = self
            .positions
            .iter()
            .map(|&i| row.get(i).unwrap_or_default().to_string())
            .collect();
        Ok(Record::new(values))
    }
}

impl Iterator for CsvRecords {
    type Item = EtlResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => {
                    self.done = true;
                    let mut err = FormatError::new(&self.path, e.to_string());
                    if let Some(pos) = e.position() {
                        err = err.with_line(pos.line());
                    }
                    return Some(Err(err.into()));
                }
            };

            // Whitespace-only lines trim down to a single empty field
            if row.len() == 1 && row.get(0).is_some_and(str::is_empty) {
                continue;
            }

            let projected = self.project(&row);
            if projected.is_err() {
                self.done = true;
            }
            return Some(projected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn collect(source: CsvSource, schema: &SchemaSpec) -> Vec<Vec<String>> {
        source
            .records(schema)
            .unwrap()
            .map(|r| r.unwrap().into_values())
            .collect()
    }

    #[test]
    fn test_projects_by_header_name() {
        let file = csv_file("M1,extra,D2,D1\n1,zzz,b,a\n2,yyy,d,c\n");
        let schema = SchemaSpec::from_rule("D", 2, "M", 1).unwrap();

        let rows = collect(CsvSource::new(file.path(), b','), &schema);
        assert_eq!(rows, vec![vec!["a", "b", "1"], vec!["c", "d", "2"]]);
    }

    #[test]
    fn test_custom_delimiter_and_quotes() {
        let file = csv_file("D1;M1\n\"x;y\";3\n");
        let schema = SchemaSpec::from_rule("D", 1, "M", 1).unwrap();

        let rows = collect(CsvSource::new(file.path(), b';'), &schema);
        assert_eq!(rows, vec![vec!["x;y", "3"]]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let file = csv_file("D1,M1\na,1\n\n   \nb,2\n");
        let schema = SchemaSpec::from_rule("D", 1, "M", 1).unwrap();

        let rows = collect(CsvSource::new(file.path(), b','), &schema);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_missing_header_field() {
        let file = csv_file("D1,M1\na,1\n");
        let schema = SchemaSpec::from_rule("D", 2, "M", 1).unwrap();

        let err = CsvSource::new(file.path(), b',').records(&schema).err().unwrap();
        match err {
            EtlError::Format(e) => {
                assert!(e.message.contains("D2"));
                assert_eq!(e.line, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_row_is_format_error() {
        let file = csv_file("D1,D2,M1\na,b,1\nc,d\ne,f,3\n");
        let schema = SchemaSpec::from_rule("D", 2, "M", 1).unwrap();

        let mut records = CsvSource::new(file.path(), b',').records(&schema).unwrap();
        assert!(records.next().unwrap().is_ok());
        let err = records.next().unwrap().unwrap_err();
        assert!(matches!(err, EtlError::Format(ref e) if e.line == Some(3)));
        // The sequence ends after a structural error
        assert!(records.next().is_none());
    }
}
