//! Conversion between the bag's declared `Tag-File-Character-Encoding` and
//! the UTF-8 strings used in memory.
//!
//! `bagit.txt` itself is always strict UTF-8; this type applies to every
//! other tag file (`bag-info.txt`, `fetch.txt`).

use encoding_rs::Encoding;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum EncodingError {
    #[error("unknown character encoding label `{0}`")]
    UnknownLabel(String),
    #[error("byte sequence is not valid {0}")]
    Malformed(&'static str),
    #[error("text cannot be represented in {0}")]
    Unrepresentable(&'static str),
}

/// A character set resolved from its declaration label.
#[derive(Clone, Debug, PartialEq)]
pub struct TagEncoding {
    label: String,
    inner: &'static Encoding,
}

impl TagEncoding {
    /// Resolve a declaration label (`UTF-8`, `ISO-8859-1`, ...) against the
    /// WHATWG encoding registry.
    pub fn for_label(label: &str) -> Result<Self, EncodingError> {
        let inner = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| EncodingError::UnknownLabel(label.to_string()))?;

        Ok(Self {
            label: label.trim().to_string(),
            inner,
        })
    }

    pub fn utf8() -> Self {
        Self {
            label: "UTF-8".to_string(),
            inner: encoding_rs::UTF_8,
        }
    }

    /// The label as declared, preserved verbatim for `bagit.txt`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Convert on-disk bytes to a UTF-8 string.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, EncodingError> {
        let (text, _, had_errors) = self.inner.decode(bytes);

        if had_errors {
            return Err(EncodingError::Malformed(self.inner.name()));
        }

        Ok(text.into_owned())
    }

    /// Convert a UTF-8 string to on-disk bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, EncodingError> {
        let (bytes, _, had_errors) = self.inner.encode(text);

        if had_errors {
            return Err(EncodingError::Unrepresentable(self.inner.name()));
        }

        Ok(bytes.into_owned())
    }
}

impl Default for TagEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}
