//! Fatal error types of the pipeline stages.
//!
//! Per-record problems are never errors; they end up in
//! [`Diagnostics`](crate::parser::Diagnostics) instead.

use std::fmt;
use std::path::{Path, PathBuf};

/// Why an input log could not be read at all.
#[derive(Debug)]
pub enum ParseErrorKind {
    Io(std::io::Error),
    Xml(quick_xml::Error),
    /// The document parsed but is not a complete XML tree.
    Malformed(String),
}

/// A fatal failure reading one input log.
#[derive(Debug)]
pub struct ParseError {
    pub path: PathBuf,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: ParseErrorKind::Io(err),
        }
    }

    pub fn xml(path: &Path, err: quick_xml::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: ParseErrorKind::Xml(err),
        }
    }

    pub fn malformed(path: &Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: ParseErrorKind::Malformed(message.into()),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.display();
        match &self.kind {
            ParseErrorKind::Io(err) => write!(f, "cannot read {path}: {err}"),
            ParseErrorKind::Xml(err) => write!(f, "invalid XML in {path}: {err}"),
            ParseErrorKind::Malformed(msg) => write!(f, "malformed XML in {path}: {msg}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrorKind::Io(err) => Some(err),
            ParseErrorKind::Xml(err) => Some(err),
            ParseErrorKind::Malformed(_) => None,
        }
    }
}

/// Invalid run configuration, detected before any input log is opened.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NotANumber { option: &'static str },
    InvertedWindow { depart_earliest: f64, arrival_latest: f64 },
    EmptyVehicleType,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotANumber { option } => write!(f, "{option} is not a number"),
            ConfigError::InvertedWindow {
                depart_earliest,
                arrival_latest,
            } => write!(
                f,
                "depart_earliest ({depart_earliest}) is after arrival_latest ({arrival_latest})"
            ),
            ConfigError::EmptyVehicleType => write!(f, "vehicle_type must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}
