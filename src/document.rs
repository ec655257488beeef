//! Owned XML documents
//!
//! Documents cross every cache boundary by value: strategies copy them in on
//! save and hand out fresh copies on load, so no two threads ever share a
//! mutable document. XML processing itself happens elsewhere; this type only
//! checks that a payload looks like a serialized document.

use std::fmt;
use thiserror::Error;

/// Reasons a byte payload is rejected as a document
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document is empty")]
    Empty,
    #[error("document is not valid UTF-8")]
    InvalidEncoding,
    #[error("document is not enclosed in markup")]
    NotMarkup,
}

/// Serialized XML document owned by its holder
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Document {
    bytes: Vec<u8>,
}

impl Document {
    /// Validate and take ownership of a serialized document
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] when the payload is empty, not UTF-8, or not
    /// enclosed in `<` ... `>`.
    pub fn parse(bytes: impl Into<Vec<u8>>) -> Result<Self, DocumentError> {
        let bytes = bytes.into();
        let text = std::str::from_utf8(&bytes).map_err(|_| DocumentError::InvalidEncoding)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DocumentError::Empty);
        }
        if !(trimmed.starts_with('<') && trimmed.ends_with('>')) {
            return Err(DocumentError::NotMarkup);
        }
        Ok(Self { bytes })
    }

    /// Placeholder document reporting a failed block
    #[must_use]
    pub fn error(block: &str, message: &str) -> Self {
        let text = format!(
            "<invoke_failed block=\"{}\" error=\"{}\"/>",
            escape_attr(block),
            escape_attr(message)
        );
        Self {
            bytes: text.into_bytes(),
        }
    }

    /// Placeholder for a slot whose block did not finish in time
    #[must_use]
    pub fn timed_out(block: &str) -> Self {
        Self::error(block, "timed out")
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Document text; payloads are UTF-8 by construction
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or_default()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Payload size in bytes, used for memory accounting
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether this is a placeholder produced by [`Document::error`]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.bytes.starts_with(b"<invoke_failed")
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("len", &self.bytes.len())
            .field("text", &self.as_str())
            .finish()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
