//! Tag keys
//!
//! A cacheable invocation is described by an [`InvocationSignature`]. Each
//! strategy turns the signature into a [`TagKey`]: the composed key text,
//! which is persisted next to the data for collision checks, plus a
//! strategy-specific storage id (raw text, a digest, or a sharded path).

use sha2::{Digest, Sha256};
use std::fmt;

/// Separator between the parts of a composed key
const KEY_SEPARATOR: char = '|';

/// Identity and parameters of one cacheable invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InvocationSignature {
    /// Stylesheet applied to the result, when the result depends on one
    pub stylesheet: Option<String>,
    /// Canonical method (or page) name
    pub method: String,
    /// Invocation parameters, already stringified, in call order
    pub params: Vec<String>,
}

impl InvocationSignature {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            stylesheet: None,
            method: method.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_stylesheet(mut self, stylesheet: impl Into<String>) -> Self {
        self.stylesheet = Some(stylesheet.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    #[must_use]
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Key text shared by all strategies
    ///
    /// Parts are joined with `|`; a literal `|` or `\` inside a part is
    /// backslash-escaped so distinct signatures never compose to the same text.
    #[must_use]
    pub fn compose(&self) -> String {
        let mut out = String::new();
        push_part(&mut out, self.stylesheet.as_deref().unwrap_or_default());
        out.push(KEY_SEPARATOR);
        push_part(&mut out, &self.method);
        for param in &self.params {
            out.push(KEY_SEPARATOR);
            push_part(&mut out, param);
        }
        out
    }
}

fn push_part(out: &mut String, part: &str) {
    for c in part.chars() {
        if c == KEY_SEPARATOR || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Strategy-specific cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagKey {
    text: String,
    storage_id: String,
}

impl TagKey {
    /// Key whose storage id is the composed text itself
    #[must_use]
    pub fn raw(signature: &InvocationSignature) -> Self {
        let text = signature.compose();
        Self {
            storage_id: text.clone(),
            text,
        }
    }

    /// Key whose storage id is the hex SHA-256 digest of the composed text
    #[must_use]
    pub fn hashed(signature: &InvocationSignature) -> Self {
        let text = signature.compose();
        Self {
            storage_id: hex_digest(&text),
            text,
        }
    }

    /// Key with an explicit storage id
    pub fn with_storage_id(text: impl Into<String>, storage_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            storage_id: storage_id.into(),
        }
    }

    /// Composed key text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Identifier the owning strategy stores the entry under
    #[must_use]
    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Lowercase hex SHA-256 digest of `text`
#[must_use]
pub fn hex_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
