//! Contract of the rich-text editor view, and a view backed directly by a replica.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use folio_core::{Replica, UpdateOrigin};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::SessionError;

pub trait EditorView: Send + Sync {
    /// Render `replica` from now on.
    fn attach(&self, replica: Arc<Replica>);

    fn detach(&self);

    /// Instance of the replica currently rendered.
    fn attached_instance(&self) -> Option<Uuid>;

    /// Whether the view accepts programmatic writes yet.
    fn is_ready(&self) -> bool;

    fn is_empty(&self) -> bool;

    fn content(&self) -> String;

    /// Programmatic write of the whole document. Not recorded in undo history.
    fn set_content(&self, content: &str) -> Result<(), SessionError>;

    /// Write `content` into an empty document as one atomic step. Returns
    /// `false`, leaving the document untouched, if it already had content.
    /// Not recorded in undo history.
    fn fill_if_empty(&self, content: &str) -> Result<bool, SessionError>;

    /// Stop showing anything until the next `attach`.
    fn clear_content(&self);
}

/// Editor view that renders the attached replica's text as-is.
pub struct ReplicaEditor {
    replica: RwLock<Option<Arc<Replica>>>,
    ready: AtomicBool,
}

impl Default for ReplicaEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaEditor {
    pub fn new() -> Self {
        Self {
            replica: RwLock::new(None),
            ready: AtomicBool::new(true),
        }
    }

    /// A view that still has to finish mounting.
    pub fn not_ready() -> Self {
        let editor = Self::new();
        editor.set_ready(false);
        editor
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Append text as a user edit.
    pub fn type_text(&self, text: &str) -> Result<(), SessionError> {
        let replica = self.live_replica()?;
        replica.insert(replica.content_len(), text)?;
        Ok(())
    }

    pub(crate) fn live_replica(&self) -> Result<Arc<Replica>, SessionError> {
        self.replica
            .read()
            .as_ref()
            .filter(|replica| !replica.is_destroyed())
            .cloned()
            .ok_or(SessionError::EditorDetached)
    }
}

impl EditorView for ReplicaEditor {
    fn attach(&self, replica: Arc<Replica>) {
        *self.replica.write() = Some(replica);
    }

    fn detach(&self) {
        self.replica.write().take();
    }

    fn attached_instance(&self) -> Option<Uuid> {
        self.replica.read().as_ref().map(|replica| replica.instance())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn is_empty(&self) -> bool {
        self.replica.read().as_ref().map_or(true, |replica| replica.is_empty())
    }

    fn content(&self) -> String {
        self.replica
            .read()
            .as_ref()
            .map(|replica| replica.content())
            .unwrap_or_default()
    }

    fn set_content(&self, content: &str) -> Result<(), SessionError> {
        let replica = self.live_replica()?;
        replica.replace_content(content, UpdateOrigin::Hydration)?;
        Ok(())
    }

    fn fill_if_empty(&self, content: &str) -> Result<bool, SessionError> {
        let replica = self.live_replica()?;
        Ok(replica.insert_if_empty(content, UpdateOrigin::Hydration)?)
    }

    fn clear_content(&self) {
        self.detach();
    }
}
