//! Pull-based reader for `<objects>` documents.
//!
//! ```text
//! <objects>
//!     <object name="D1"><value>a</value></object>
//!     <object name="M1"><value>1</value></object>
//! </objects>
//! <objects>
//!     ...
//! </objects>
//! ```
//!
//! Each `<objects>` element becomes one record. Only the name/value pairs of
//! the element being read are held in memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::RecordSource;
use crate::error::{EtlResult, FormatError};
use crate::models::{Record, SchemaSpec};

/// XML file made of `<objects>` elements.
#[derive(Debug, Clone)]
pub struct XmlSource {
    path: PathBuf,
}

impl XmlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for XmlSource {
    type Records = XmlRecords;

    fn records(self, schema: &SchemaSpec) -> EtlResult<XmlRecords> {
        let file = File::open(&self.path)
            .map_err(|e| FormatError::new(&self.path, format!("cannot open: {e}")))?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);

        Ok(XmlRecords {
            path: self.path,
            reader,
            buf: Vec::new(),
            names: schema.all_names().to_vec(),
            element: 0,
            done: false,
        })
    }
}

/// Lazy records of an [`XmlSource`].
pub struct XmlRecords {
    path: PathBuf,
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
    names: Vec<String>,
    element: usize,
    done: bool,
}

/// Where the reader is inside the current `<objects>` element.
#[derive(Default)]
struct ElementState {
    fields: HashMap<String, String>,
    open: bool,
    object: Option<String>,
    value: Option<String>,
}

impl XmlRecords {
    fn read_element(&mut self) -> EtlResult<Option<Record>> {
        let Self {
            path,
            reader,
            buf,
            names,
            element,
            ..
        } = self;
        let path: &Path = path;
        let names: &[String] = names;
        let mut state = ElementState::default();

        loop {
            buf.clear();
            let event = reader
                .read_event_into(buf)
                .map_err(|e| syntax_error(path, reader.buffer_position(), e))?;

            match event {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"objects" => {
                        state = ElementState {
                            open: true,
                            ..ElementState::default()
                        };
                    }
                    b"object" if state.open => {
                        state.object = Some(object_name(path, &e)?);
                    }
                    b"value" if state.object.is_some() => {
                        state.value = Some(String::new());
                    }
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"value" => {
                        if let Some(name) = &state.object {
                            state.fields.insert(name.clone(), String::new());
                        }
                    }
                    b"object" if state.open => {
                        // Validates the name even though there is no value
                        object_name(path, &e)?;
                    }
                    b"objects" => {
                        *element += 1;
                        return project(path, names, *element, HashMap::new()).map(Some);
                    }
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(value) = state.value.as_mut() {
                        let text = t
                            .unescape()
                            .map_err(|e| syntax_error(path, reader.buffer_position(), e))?;
                        value.push_str(&text);
                    }
                }
                Event::CData(t) => {
                    if let Some(value) = state.value.as_mut() {
                        value.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"value" => {
                        if let (Some(name), Some(value)) = (&state.object, state.value.take()) {
                            state.fields.insert(name.clone(), value);
                        }
                    }
                    b"object" => state.object = None,
                    b"objects" if state.open => {
                        *element += 1;
                        return project(path, names, *element, state.fields).map(Some);
                    }
                    _ => {}
                },
                Event::Eof => {
                    if state.open {
                        return Err(FormatError::new(
                            path,
                            "document ends inside an <objects> element",
                        )
                        .into());
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

impl Iterator for XmlRecords {
    type Item = EtlResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_element() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn project(
    path: &Path,
    names: &[String],
    element: usize,
    mut fields: HashMap<String, String>,
) -> EtlResult<Record> {
    let values = names
        .iter()
        .map(|name| {
            fields.remove(name).ok_or_else(|| {
                FormatError::new(path, format!("<objects> element #{element} has no field '{name}'"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Record::new(values))
}

fn object_name(path: &Path, element: &BytesStart<'_>) -> Result<String, FormatError> {
    let attr = element
        .try_get_attribute("name")
        .map_err(|e| FormatError::new(path, format!("bad <object> attribute: {e}")))?
        .ok_or_else(|| FormatError::new(path, "<object> without a name attribute"))?;
    let name = attr
        .unescape_value()
        .map_err(|e| FormatError::new(path, format!("bad <object> name: {e}")))?;
    Ok(name.into_owned())
}

fn syntax_error(path: &Path, position: impl std::fmt::Display, err: quick_xml::Error) -> FormatError {
    FormatError::new(path, format!("malformed XML near byte {position}: {err}"))
}
