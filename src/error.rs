use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::theme::THEME_NAMES;

/// Malformed SVG markup handed to the document parser.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid SVG markup at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("expected an <svg> root element, found <{0}>")]
    NotSvg(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("unexpected closing tag </{0}>")]
    UnbalancedClose(String),
    #[error("unclosed element <{0}>")]
    Unclosed(String),
}

/// Returned by a rendering collaborator when the diagram source does not parse.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub message: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<DocumentError> for SyntaxError {
    fn from(err: DocumentError) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("diagram has no visible content")]
    EmptyDiagram,
    #[error("could not measure diagram: {0}")]
    Measure(String),
}

/// Failure of a single rasterization attempt. These never reach the user on
/// their own; they drive the retry cascade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RasterError {
    #[error("{width}x{height} px surface exceeds the {max} px limit")]
    SurfaceTooLarge { width: u32, height: u32, max: u32 },
    #[error("could not allocate a {width}x{height} px surface")]
    Allocation { width: u32, height: u32 },
    #[error("no resolution left to try")]
    NoCandidates,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum TitleError {
    #[error("no title service configured")]
    Unavailable,
    #[error("title request failed: {0}")]
    Request(String),
    #[error("title request timed out")]
    Timeout,
    #[error("title service returned no text")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: the diagram is empty")]
    EmptyDiagram,
    #[error("could not prepare the diagram for export: {0}")]
    InvalidDocument(String),
    #[error(
        "export failed at every resolution (last error: {last}); export as SVG instead or reduce the diagram size"
    )]
    Failed { last: RasterError },
    #[error("failed to save {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<SanitizeError> for ExportError {
    fn from(err: SanitizeError) -> Self {
        match err {
            SanitizeError::EmptyDiagram => Self::EmptyDiagram,
            SanitizeError::Measure(message) => Self::InvalidDocument(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown theme `{0}` (expected one of: {names})", names = THEME_NAMES.join(", "))]
    UnknownTheme(String),
}
