use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocDbError, Result};

/// Serialization format of a stored document or configuration payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Xml,
    Json,
    Text,
    Binary,
}

impl Format {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Xml => "application/xml",
            Format::Json => "application/json",
            Format::Text => "text/plain",
            Format::Binary => "application/octet-stream",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Xml => "xml",
            Format::Json => "json",
            Format::Text => "text",
            Format::Binary => "binary",
        }
    }

    /// Best-effort mapping from a `Content-Type` header value.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        if essence.ends_with("json") {
            Format::Json
        } else if essence.ends_with("xml") {
            Format::Xml
        } else if essence.starts_with("text/") {
            Format::Text
        } else {
            Format::Binary
        }
    }
}

/// Request body handed to the transport.
///
/// In-memory bytes can be replayed after an authentication challenge or a
/// retryable failure; a reader is consumed by the first attempt.
pub enum Content {
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send + Sync>),
}

impl Content {
    pub fn from_reader(reader: impl Read + Send + Sync + 'static) -> Self {
        Content::Reader(Box::new(reader))
    }

    pub fn is_resendable(&self) -> bool {
        matches!(self, Content::Bytes(_))
    }

    /// Drain the content into memory.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Content::Bytes(bytes) => Ok(bytes),
            Content::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).map_err(|e| {
                    DocDbError::InvalidInput(format!("failed to read content stream: {e}"))
                })?;
                Ok(buf)
            }
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Bytes(b) => write!(f, "Content::Bytes({} bytes)", b.len()),
            Content::Reader(_) => f.write_str("Content::Reader(..)"),
        }
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Content::Bytes(value)
    }
}

impl From<&[u8]> for Content {
    fn from(value: &[u8]) -> Self {
        Content::Bytes(value.to_vec())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Bytes(value.into_bytes())
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Bytes(value.as_bytes().to_vec())
    }
}

/// A document read back from the server or matched by a search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub uri: String,
    #[serde(default)]
    pub format: Format,
    #[serde(with = "content_text")]
    pub content: Vec<u8>,
}

impl Document {
    /// Content as UTF-8 text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// Search payloads carry document content as a JSON string.
mod content_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(content: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&String::from_utf8_lossy(content))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(d).map(String::into_bytes)
    }
}

/// The raw search response that produced a collector's first page.
///
/// The payload is kept as returned by the server; accessors read the common
/// `total` / `start` / `page-length` / `results` fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchResult(pub Value);

impl SearchResult {
    pub fn total(&self) -> u64 {
        self.0.get("total").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn start(&self) -> u64 {
        self.0.get("start").and_then(Value::as_u64).unwrap_or(1)
    }

    pub fn page_length(&self) -> Option<u64> {
        self.0.get("page-length").and_then(Value::as_u64)
    }

    /// URIs of the matches listed in this payload, in result order.
    pub fn uris(&self) -> Vec<String> {
        self.results()
            .iter()
            .filter_map(|r| r.get("uri").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn results(&self) -> &[Value] {
        self.0
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
