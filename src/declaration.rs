//! The `bagit.txt` declaration: version and tag-file encoding.

use crate::encoding::{EncodingError, TagEncoding};
use std::fmt::Display;
use std::str::FromStr;

pub(crate) const BAGIT_TXT: &str = "bagit.txt";
pub const KEY_VERSION: &str = "BagIt-Version";
pub const KEY_ENCODING: &str = "Tag-File-Character-Encoding";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DeclarationError {
    /// `bagit.txt` is strict UTF-8 no matter what encoding it declares.
    #[error("`bagit.txt` is not valid UTF-8")]
    NotUtf8,
    #[error("`bagit.txt` must hold exactly two lines, found {0}")]
    WrongLineCount(usize),
    #[error("malformed `{KEY_VERSION}` line")]
    MalformedVersion,
    #[error("malformed `{KEY_ENCODING}` line")]
    MalformedEncoding,
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// A `<major>.<minor>` BagIt version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const V1_0: Version = Version { major: 1, minor: 0 };

    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn at_least(&self, major: u8, minor: u8) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::V1_0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').ok_or(DeclarationError::MalformedVersion)?;

        let major = major
            .parse()
            .map_err(|_| DeclarationError::MalformedVersion)?;
        let minor = minor
            .parse()
            .map_err(|_| DeclarationError::MalformedVersion)?;

        Ok(Self { major, minor })
    }
}

/// Parsed contents of `bagit.txt`.
#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    pub version: Version,
    pub encoding: TagEncoding,
}

impl Declaration {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, DeclarationError> {
        let content = std::str::from_utf8(bytes).map_err(|_| DeclarationError::NotUtf8)?;

        let lines: Vec<&str> = content.lines().filter(|line| !line.trim().is_empty()).collect();
        if lines.len() != 2 {
            return Err(DeclarationError::WrongLineCount(lines.len()));
        }

        let version = lines[0]
            .split_once(": ")
            .filter(|(key, _)| *key == KEY_VERSION)
            .ok_or(DeclarationError::MalformedVersion)?
            .1
            .trim()
            .parse()?;

        let label = lines[1]
            .split_once(": ")
            .filter(|(key, _)| *key == KEY_ENCODING)
            .ok_or(DeclarationError::MalformedEncoding)?
            .1
            .trim();
        if label.is_empty() {
            return Err(DeclarationError::MalformedEncoding);
        }

        Ok(Self {
            version,
            encoding: TagEncoding::for_label(label)?,
        })
    }

    pub(crate) fn render(version: Version, encoding: &TagEncoding) -> String {
        format!(
            "{KEY_VERSION}: {version}\n{KEY_ENCODING}: {}\n",
            encoding.label()
        )
    }
}
