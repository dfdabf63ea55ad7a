use serde::{Deserialize, Serialize};
use std::fmt;

pub mod replica;

pub use replica::{CoreError, Replica, UpdateOrigin};

/// Opaque identifier of a document. Stable for the document's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length-prefixed byte form, safe to use as a key prefix.
    pub fn key_prefix(&self) -> Vec<u8> {
        let bytes = self.0.as_bytes();
        let mut key = Vec::with_capacity(bytes.len() + 4);
        key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(bytes);
        key
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Document metadata as served by the hosted backend.
///
/// Only `id` and `initial_content` matter to the session layer; the rest
/// rides along for callers that render navigation.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DocumentMeta {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "initialContent")]
    pub initial_content: Option<String>,
    #[serde(default, rename = "parentId")]
    pub parent_id: Option<DocumentId>,
}

impl DocumentMeta {
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            initial_content: None,
            parent_id: None,
        }
    }

    pub fn with_initial_content(mut self, content: impl Into<String>) -> Self {
        self.initial_content = Some(content.into());
        self
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Initial content, treating an empty string as absent.
    pub fn initial_content(&self) -> Option<&str> {
        self.initial_content.as_deref().filter(|c| !c.is_empty())
    }
}
