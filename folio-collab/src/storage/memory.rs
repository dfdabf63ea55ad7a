//! In-process `LocalStore`, used by tests and by sessions that run without a disk.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use folio_core::{DocumentId, Replica, UpdateOrigin};
use parking_lot::Mutex;

use super::{LocalStore, LocalStoreHandle, ReadySignal, StoreError, SubscriptionSlot};

type Logs = Arc<Mutex<HashMap<DocumentId, Vec<Vec<u8>>>>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    logs: Logs,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log of `id` with an update, as if it had been written earlier.
    pub fn insert_update(&self, id: &DocumentId, update: Vec<u8>) {
        self.logs.lock().entry(id.clone()).or_default().push(update);
    }

    /// Seed `id` with plain text content.
    pub fn seed_content(&self, id: &DocumentId, content: &str) -> Result<(), StoreError> {
        let scratch = Replica::new(id.clone());
        scratch.insert(0, content)?;
        self.insert_update(id, scratch.encode_state()?);
        Ok(())
    }

    pub fn update_count(&self, id: &DocumentId) -> usize {
        self.logs.lock().get(id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn open(
        &self,
        id: &DocumentId,
        replica: Arc<Replica>,
        ready: ReadySignal,
    ) -> Result<Box<dyn LocalStoreHandle>, StoreError> {
        let stored = self.logs.lock().get(id).cloned().unwrap_or_default();
        for update in &stored {
            if let Err(e) = replica.apply_update(update, UpdateOrigin::Store) {
                log::warn!("Skipping stored update for {id}: {e}");
            }
        }

        let logs = self.logs.clone();
        let doc_id = id.clone();
        let subscription = replica.observe_updates(move |update, origin| {
            if origin != UpdateOrigin::Store {
                logs.lock().entry(doc_id.clone()).or_default().push(update.to_vec());
            }
        })?;

        ready.signal();

        Ok(Box::new(MemoryHandle {
            id: id.clone(),
            replica,
            logs: self.logs.clone(),
            subscription: Mutex::new(Some(subscription)),
        }))
    }
}

struct MemoryHandle {
    id: DocumentId,
    replica: Arc<Replica>,
    logs: Logs,
    subscription: SubscriptionSlot,
}

#[async_trait]
impl LocalStoreHandle for MemoryHandle {
    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.subscription.lock().take().is_none() {
            return Ok(());
        }
        if !self.replica.is_destroyed() {
            let snapshot = self.replica.encode_state()?;
            self.logs.lock().insert(self.id.clone(), vec![snapshot]);
        }
        Ok(())
    }
}
