//! Durable local caches that replay a document into a replica.
//!
//! ```text
//! open(id, replica, ready)
//!     │
//!     ├── replay snapshot + update log  ──► replica (origin: Store)
//!     ├── subscribe to replica updates  ──► append to update log
//!     └── ready.signal()                    (exactly once)
//!
//! close()
//!     └── fold update log into a new snapshot, drop the subscription
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use folio_core::{CoreError, DocumentId, Replica};
use parking_lot::Mutex;

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("replica error: {0}")]
    Replica(#[from] CoreError),
    #[error("store handle for {0} is closed")]
    Closed(DocumentId),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// One-shot notification that local state has been fully replayed.
pub struct ReadySignal(Box<dyn FnOnce() + Send>);

impl ReadySignal {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// A signal nobody listens to.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn signal(self) {
        (self.0)()
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadySignal")
    }
}

/// Opens per-document durable caches.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn open(
        &self,
        id: &DocumentId,
        replica: Arc<Replica>,
        ready: ReadySignal,
    ) -> Result<Box<dyn LocalStoreHandle>, StoreError>;
}

/// A durable cache bound to one replica.
#[async_trait]
pub trait LocalStoreHandle: Send + Sync {
    fn document_id(&self) -> &DocumentId;

    /// Flush and release. Safe to call more than once.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Subscription slot shared by the store handles.
pub(crate) type SubscriptionSlot = Mutex<Option<yrs::Subscription>>;
