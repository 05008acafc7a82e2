//! Incremental reader for a top-level JSON array of flat objects.
//!
//! The array may be preceded by a few wrapper bytes (e.g. `{"data": ` or a
//! BOM); the reader scans at most [`PREFIX_SCAN_LIMIT`] bytes for the first
//! `[`. Elements are then deserialized one at a time straight from the
//! buffered file, so only the current object is ever in memory.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::RecordSource;
use crate::error::{EtlResult, FormatError};
use crate::models::{Record, SchemaSpec};

/// How many leading bytes may precede the opening `[`.
pub const PREFIX_SCAN_LIMIT: usize = 1024;

/// JSON file holding an array of objects.
#[derive(Debug, Clone)]
pub struct JsonSource {
    path: PathBuf,
}

impl JsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for JsonSource {
    type Records = JsonRecords;

    fn records(self, schema: &SchemaSpec) -> EtlResult<JsonRecords> {
        let file = File::open(&self.path)
            .map_err(|e| FormatError::new(&self.path, format!("cannot open: {e}")))?;

        let mut records = JsonRecords {
            path: self.path,
            reader: BufReader::new(file),
            names: schema.all_names().to_vec(),
            index: 0,
            state: ArrayState::First,
        };
        records.seek_array_start()?;
        Ok(records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    First,
    Rest,
    Done,
}

/// Lazy records of a [`JsonSource`].
pub struct JsonRecords {
    path: PathBuf,
    reader: BufReader<File>,
    names: Vec<String>,
    index: usize,
    state: ArrayState,
}

impl JsonRecords {
    fn error(&self, message: impl Into<String>) -> FormatError {
        FormatError::new(&self.path, message)
    }

    fn peek(&mut self) -> Result<Option<u8>, FormatError> {
        let next = self.reader.fill_buf().map(|bytes| bytes.first().copied());
        next.map_err(|e| self.error(format!("read failed: {e}")))
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>, FormatError> {
        loop {
            match self.peek()? {
                Some(b) if b.is_ascii_whitespace() => self.reader.consume(1),
                other => return Ok(other),
            }
        }
    }

    fn seek_array_start(&mut self) -> Result<(), FormatError> {
        for _ in 0..PREFIX_SCAN_LIMIT {
            match self.peek()? {
                Some(b'[') => {
                    self.reader.consume(1);
                    return Ok(());
                }
                Some(_) => self.reader.consume(1),
                None => break,
            }
        }
        Err(self.error(format!(
            "no '[' within the first {PREFIX_SCAN_LIMIT} bytes"
        )))
    }

    fn read_element(&mut self) -> EtlResult<Option<Record>> {
        let next = self.skip_whitespace()?;
        match (self.state, next) {
            (ArrayState::Done, _) => return Ok(None),
            (_, Some(b']')) => {
                self.state = ArrayState::Done;
                return Ok(None);
            }
            (ArrayState::First, Some(b'{')) => {}
            (ArrayState::Rest, Some(b',')) => {
                self.reader.consume(1);
                if self.skip_whitespace()? != Some(b'{') {
                    return Err(self
                        .error(format!("array element #{} is not an object", self.index + 1))
                        .into());
                }
            }
            (_, None) => return Err(self.error("unexpected end of document inside the array").into()),
            (ArrayState::First, Some(_)) => {
                return Err(self.error("array element #1 is not an object").into());
            }
            (ArrayState::Rest, Some(b)) => {
                return Err(self
                    .error(format!(
                        "expected ',' or ']' after element #{}, found '{}'",
                        self.index,
                        b as char
                    ))
                    .into());
            }
        }

        // An object is self-delimiting, so the deserializer stops right after '}'
        let object = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            Map::<String, Value>::deserialize(&mut de)
        }
        .map_err(|e| self.error(format!("array element #{}: {e}", self.index + 1)))?;

        self.index += 1;
        self.state = ArrayState::Rest;
        self.project(object).map(Some)
    }

    fn project(&self, mut object: Map<String, Value>) -> EtlResult<Record> {
        let values = self
            .names
            .iter()
            .map(|name| {
                object.remove(name).map(value_to_text).ok_or_else(|| {
                    self.error(format!("array element #{} has no key '{name}'", self.index))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Record::new(values))
    }
}

impl Iterator for JsonRecords {
    type Item = EtlResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_element() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.state = ArrayState::Done;
                Some(Err(e))
            }
        }
    }
}

/// Render a JSON value as the text stored for it.
pub fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn json_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn schema() -> SchemaSpec {
        SchemaSpec::from_rule("D", 1, "M", 1).unwrap()
    }

    #[test]
    fn test_reads_array_after_wrapper_prefix() {
        let file = json_file(r#"{"data": [ {"M1": 1, "D1": "a", "x": true}, {"D1":"b","M1":"2"} ]}"#);

        let rows: Vec<_> = JsonSource::new(file.path())
            .records(&schema())
            .unwrap()
            .map(|r| r.unwrap().into_values())
            .collect();
        assert_eq!(rows, vec![vec!["a", "1"], vec!["b", "2"]]);
    }

    #[test]
    fn test_empty_array() {
        let file = json_file("  [ ]  ");
        let mut records = JsonSource::new(file.path()).records(&schema()).unwrap();
        assert!(records.next().is_none());
        assert!(records.next().is_none());
    }

    #[test]
    fn test_no_array_in_prefix() {
        let padding = " ".repeat(PREFIX_SCAN_LIMIT + 10);
        let file = json_file(&format!("{padding}[{{\"D1\":\"a\",\"M1\":1}}]"));

        let err = JsonSource::new(file.path()).records(&schema()).err().unwrap();
        assert!(matches!(err, EtlError::Format(_)));
    }

    #[test]
    fn test_missing_key() {
        let file = json_file(r#"[{"D1":"a","M1":1},{"D1":"b"}]"#);
        let mut records = JsonSource::new(file.path()).records(&schema()).unwrap();

        assert!(records.next().unwrap().is_ok());
        let err = records.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("'M1'"));
        assert!(records.next().is_none());
    }

    #[test]
    fn test_non_object_element() {
        let file = json_file(r#"[{"D1":"a","M1":1}, 5]"#);
        let mut records = JsonSource::new(file.path()).records(&schema()).unwrap();

        assert!(records.next().unwrap().is_ok());
        assert!(matches!(records.next(), Some(Err(EtlError::Format(_)))));
    }

    #[test]
    fn test_malformed_object() {
        let file = json_file(r#"[{"D1":"a" "M1":1}]"#);
        let mut records = JsonSource::new(file.path()).records(&schema()).unwrap();
        assert!(matches!(records.next(), Some(Err(EtlError::Format(_)))));
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(value_to_text(json!("x")), "x");
        assert_eq!(value_to_text(json!(12)), "12");
        assert_eq!(value_to_text(json!(1.5)), "1.5");
        assert_eq!(value_to_text(json!(false)), "false");
        assert_eq!(value_to_text(json!(null)), "");
        assert_eq!(value_to_text(json!([1, 2])), "[1,2]");
    }
}
