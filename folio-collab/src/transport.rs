//! Contract between the session layer and a network synchronization link.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use folio_core::{DocumentId, Replica};

use crate::protocol::ProtocolError;

/// Lifecycle events emitted by a link, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A (re)connection attempt started
    Connecting,
    Connected,
    /// Initial handshake with the remote finished
    Synced,
    /// Connection lost; the link will retry on its own
    Disconnected,
    /// Connection attempt or session failed; the link will retry on its own
    Error(String),
}

/// Callback receiving a link's events. Invoked from the link's task.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(TransportEvent) + Send + Sync>);

impl EventSink {
    pub fn new(f: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// Opens links that keep a replica in sync with a remote endpoint.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        id: &DocumentId,
        replica: Arc<Replica>,
        events: EventSink,
    ) -> Result<Box<dyn SyncLink>, ProtocolError>;
}

/// One open synchronization link.
pub trait SyncLink: Send + Sync {
    fn document_id(&self) -> &DocumentId;

    /// Stop immediately without waiting for the remote. Idempotent.
    fn disconnect(&self);

    /// Release everything the link holds. Implies `disconnect`.
    fn destroy(&self) -> Result<(), ProtocolError>;
}
