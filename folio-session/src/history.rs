//! Undo/redo bound to the active replica's editable region.

use folio_core::{DocumentId, Replica};
use parking_lot::Mutex;
use yrs::undo::UndoManager;

use crate::error::SessionError;

/// Undo history of one activation. Dropping it releases its listeners.
pub struct HistoryHandle {
    id: DocumentId,
    manager: Mutex<UndoManager<()>>,
}

impl HistoryHandle {
    pub fn bind(replica: &Replica) -> Result<Self, SessionError> {
        if replica.is_destroyed() {
            return Err(folio_core::CoreError::Destroyed(replica.id().clone()).into());
        }
        let manager = UndoManager::new(replica.doc(), replica.content_ref());
        Ok(Self {
            id: replica.id().clone(),
            manager: Mutex::new(manager),
        })
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.id
    }

    /// Returns whether anything was undone.
    pub fn undo(&self) -> bool {
        let mut manager = self.manager.lock();
        manager.can_undo() && manager.undo_blocking()
    }

    pub fn redo(&self) -> bool {
        let mut manager = self.manager.lock();
        manager.can_redo() && manager.redo_blocking()
    }

    pub fn can_undo(&self) -> bool {
        self.manager.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.manager.lock().can_redo()
    }
}

#[derive(Default)]
pub struct HistoryController {
    handle: Option<HistoryHandle>,
}

impl HistoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current history with a fresh one for `replica`.
    pub fn bind(&mut self, replica: &Replica) -> Result<(), SessionError> {
        self.release();
        self.handle = Some(HistoryHandle::bind(replica)?);
        Ok(())
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::trace!("Released history for {}", handle.document_id());
        }
    }

    pub fn undo(&self) -> bool {
        self.handle.as_ref().is_some_and(HistoryHandle::undo)
    }

    pub fn redo(&self) -> bool {
        self.handle.as_ref().is_some_and(HistoryHandle::redo)
    }

    pub fn bound_document(&self) -> Option<&DocumentId> {
        self.handle.as_ref().map(HistoryHandle::document_id)
    }
}
