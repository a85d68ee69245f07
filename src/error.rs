use crate::algorithm::UnsupportedAlgorithm;
use crate::checksum::ChecksumComputeError;
use crate::metadata::GeneratedTag;
use std::fmt::Display;
use std::path::Path;

/// A finding accumulated during load or validation, tied to the bag file
/// it concerns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    pub file: String,
    pub message: String,
}

impl Issue {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            message: message.into(),
        }
    }
}

impl Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

/// Errors surfaced by the engine API.
///
/// I/O failures carry the [`std::io::ErrorKind`] instead of the full error
/// so values stay comparable in tests.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum BagError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("failed to parse {file}: {message}")]
    Parse { file: String, message: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("i/o failure on `{path}`: {kind}")]
    Io {
        path: String,
        kind: std::io::ErrorKind,
    },
    #[error("download of `{url}` failed: {message}")]
    Download { url: String, message: String },
    #[error(transparent)]
    Checksum(#[from] ChecksumComputeError),
}

impl BagError {
    pub(crate) fn io(path: impl AsRef<Path>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            kind: error.kind(),
        }
    }

    pub(crate) fn parse(file: impl Into<String>, message: impl Display) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.to_string(),
        }
    }
}

impl From<UnsupportedAlgorithm> for BagError {
    fn from(error: UnsupportedAlgorithm) -> Self {
        Self::Unsupported(error.to_string())
    }
}

impl From<GeneratedTag> for BagError {
    fn from(error: GeneratedTag) -> Self {
        Self::Policy(error.to_string())
    }
}
