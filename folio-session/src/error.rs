//! Errors surfaced by the session manager.

use folio_collab::{ProtocolError, StoreError};
use folio_core::{CoreError, DocumentId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("cannot switch to {requested}: a switch is already in progress")]
    SwitchInProgress { requested: DocumentId },
    #[error("switch to {0} timed out while opening its connection")]
    SwitchTimedOut(DocumentId),
    #[error("no sync endpoint configured")]
    MissingEndpoint,
    #[error("metadata for {id} unavailable: {reason}")]
    Metadata { id: DocumentId, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("editor view is not attached to a live replica")]
    EditorDetached,
    #[error("session manager has been shut down")]
    ShutDown,
    #[error("switch task ended abnormally: {0}")]
    SwitchAborted(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("replica error: {0}")]
    Core(#[from] CoreError),
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Config(e.to_string())
    }
}
