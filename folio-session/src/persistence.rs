//! Binds a durable local store to the active replica.

use std::sync::Arc;

use folio_collab::{LocalStore, LocalStoreHandle, ReadySignal};
use folio_core::{DocumentId, Replica};

use crate::epoch::EpochGuard;
use crate::error::SessionError;
use crate::status::SharedState;

pub struct PersistenceAdapter {
    store: Arc<dyn LocalStore>,
    handle: Option<Box<dyn LocalStoreHandle>>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store, handle: None }
    }

    /// Open the store for `replica`. Readiness is reported through `ready`.
    pub async fn open(
        &mut self,
        id: &DocumentId,
        replica: Arc<Replica>,
        ready: ReadySignal,
    ) -> Result<(), SessionError> {
        self.close().await;
        let handle = self.store.open(id, replica, ready).await?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Idempotent; errors are logged.
    pub async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = handle.close().await {
            log::warn!("Failed to close local store for {}: {e}", handle.document_id());
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

/// Readiness signal that marks persistence ready while `guard` is current.
pub(crate) fn ready_signal(shared: Arc<SharedState>, guard: EpochGuard, id: DocumentId) -> ReadySignal {
    ReadySignal::new(move || {
        let applied = shared.update_if_current(&guard, |status| {
            let changed = !status.persistence_ready;
            status.persistence_ready = true;
            changed
        });
        if applied {
            log::debug!("Local state for {id} replayed");
        } else {
            log::trace!("Dropping stale readiness for {id}");
        }
    })
}
