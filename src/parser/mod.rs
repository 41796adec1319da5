//! XML readers for the simulator's output logs.
//!
//! Each log is read fully into memory, then walked as a flat stream of
//! open/close events. A record whose element lacks a required attribute is
//! skipped and reported through [`Diagnostics`]; only I/O failures and
//! documents that are not well-formed abort the parse.

pub mod direct_routes;
pub mod dispatchinfo;
pub mod tripinfo;

pub use direct_routes::parse_direct_routes;
pub use dispatchinfo::parse_dispatchinfo;
pub use tripinfo::parse_tripinfo;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;
use std::path::Path;
use tracing::warn;

use crate::error::ParseError;

/// A record-level problem that was recovered by skipping the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    /// Byte offset just past the offending element's start tag.
    pub position: usize,
    pub element: String,
    pub message: String,
}

/// Run-level collection of skipped records.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, file: &Path, element: &Element, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            file: file.display().to_string(),
            position: element.position,
            element: element.name.clone(),
            message: message.into(),
        };
        warn!(
            file = %diagnostic.file,
            position = diagnostic.position,
            element = %diagnostic.element,
            message = %diagnostic.message,
            "Skipping malformed record"
        );
        self.entries.push(diagnostic);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An element's name and attributes, detached from the reader buffer.
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub position: usize,
    attributes: Vec<(String, String)>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>, position: usize) -> Result<Self, quick_xml::Error> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            position,
            attributes,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_attributes(name: &str, attributes: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            position: 0,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn required(&self, key: &str) -> Result<&str, String> {
        self.attr(key)
            .ok_or_else(|| format!("missing required attribute `{key}`"))
    }

    pub fn required_number(&self, key: &str) -> Result<f64, String> {
        parse_number(key, self.required(key)?)
    }

    /// An absent attribute is `None`; one that is present but unparsable is an error.
    pub fn optional_number(&self, key: &str) -> Result<Option<f64>, String> {
        self.attr(key).map(|raw| parse_number(key, raw)).transpose()
    }

    /// Like [`optional_number`](Self::optional_number), mapping the simulator's
    /// negative "not reached" marker to `None`.
    pub fn reached(&self, key: &str) -> Result<Option<f64>, String> {
        Ok(self.optional_number(key)?.filter(|v| *v >= 0.0))
    }

    /// Space-separated identifier list; absent means empty.
    pub fn id_list(&self, key: &str) -> Vec<String> {
        self.attr(key)
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

fn parse_number(key: &str, raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("attribute `{key}` is not a finite number: {raw:?}"))
}

/// One step of the walk over an XML document.
///
/// `depth` is 0 for the root element, 1 for its children and so on.
#[derive(Debug)]
pub enum XmlEvent<'a> {
    Open { element: &'a Element, depth: usize },
    Close { name: &'a str, depth: usize },
}

/// Reads `path` completely and walks it, closing the file before returning.
pub fn scan_file(path: &Path, on_event: impl FnMut(XmlEvent<'_>)) -> Result<(), ParseError> {
    let bytes = std::fs::read(path).map_err(|err| ParseError::io(path, err))?;
    scan_bytes(path, &bytes, on_event)
}

/// Walks an in-memory document; `path` is only used in error messages.
pub fn scan_bytes(
    path: &Path,
    xml: &[u8],
    mut on_event: impl FnMut(XmlEvent<'_>),
) -> Result<(), ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                if open.is_empty() && saw_root {
                    return Err(ParseError::malformed(path, "more than one root element"));
                }
                let element = Element::from_start(&start, reader.buffer_position())
                    .map_err(|err| ParseError::xml(path, err))?;
                saw_root = true;
                on_event(XmlEvent::Open {
                    element: &element,
                    depth: open.len(),
                });
                open.push(element.name);
            }
            Ok(Event::Empty(start)) => {
                if open.is_empty() && saw_root {
                    return Err(ParseError::malformed(path, "more than one root element"));
                }
                let element = Element::from_start(&start, reader.buffer_position())
                    .map_err(|err| ParseError::xml(path, err))?;
                saw_root = true;
                let depth = open.len();
                on_event(XmlEvent::Open {
                    element: &element,
                    depth,
                });
                on_event(XmlEvent::Close {
                    name: &element.name,
                    depth,
                });
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                match open.pop() {
                    Some(expected) if expected == name => {
                        on_event(XmlEvent::Close {
                            name: &name,
                            depth: open.len(),
                        });
                    }
                    Some(expected) => {
                        return Err(ParseError::malformed(
                            path,
                            format!("expected </{expected}>, found </{name}>"),
                        ));
                    }
                    None => {
                        return Err(ParseError::malformed(
                            path,
                            format!("unexpected </{name}>"),
                        ));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(ParseError::xml(path, err)),
            _ => {}
        }
        buf.clear();
    }

    if let Some(unclosed) = open.last() {
        return Err(ParseError::malformed(path, format!("unclosed <{unclosed}>")));
    }
    if !saw_root {
        return Err(ParseError::malformed(path, "no root element"));
    }
    Ok(())
}
