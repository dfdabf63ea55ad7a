//! Where document metadata comes from.

use std::collections::HashMap;

use async_trait::async_trait;
use folio_core::{DocumentId, DocumentMeta};
use parking_lot::RwLock;

use crate::error::SessionError;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, id: &DocumentId) -> Result<DocumentMeta, SessionError>;
}

/// Metadata held in memory, keyed by id.
#[derive(Default)]
pub struct InMemoryDocuments {
    documents: RwLock<HashMap<DocumentId, DocumentMeta>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, meta: DocumentMeta) {
        self.documents.write().insert(meta.id.clone(), meta);
    }

    pub fn with(self, meta: DocumentMeta) -> Self {
        self.insert(meta);
        self
    }

    pub fn remove(&self, id: &DocumentId) -> Option<DocumentMeta> {
        self.documents.write().remove(id)
    }
}

#[async_trait]
impl DocumentSource for InMemoryDocuments {
    async fn fetch(&self, id: &DocumentId) -> Result<DocumentMeta, SessionError> {
        self.documents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::Metadata {
                id: id.clone(),
                reason: "document not found".to_string(),
            })
    }
}
