//! Owns the single network link of the active document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use folio_collab::{EventSink, SyncLink, SyncTransport, TransportEvent};
use folio_core::{DocumentId, Replica};

use crate::epoch::EpochGuard;
use crate::error::SessionError;
use crate::status::{ConnectionState, SessionNotice, SharedState};

pub struct ConnectionController {
    transport: Arc<dyn SyncTransport>,
    endpoint: Option<String>,
    link: Option<Box<dyn SyncLink>>,
}

impl ConnectionController {
    pub fn new(transport: Arc<dyn SyncTransport>, endpoint: Option<String>) -> Self {
        Self {
            transport,
            endpoint,
            link: None,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Drop whatever link is held, then open a new one for `(id, replica)`.
    pub async fn connect(
        &mut self,
        id: &DocumentId,
        replica: Arc<Replica>,
        events: EventSink,
    ) -> Result<(), SessionError> {
        self.disconnect();
        let endpoint = self.endpoint.as_deref().ok_or(SessionError::MissingEndpoint)?;
        let link = self.transport.open(endpoint, id, replica, events).await?;
        log::debug!("Opened link for {id} at {endpoint}");
        self.link = Some(link);
        Ok(())
    }

    /// Idempotent. Does not wait for the remote to acknowledge.
    pub fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        if let Err(e) = link.destroy() {
            log::warn!("Failed to destroy link for {}: {e}", link.document_id());
        }
        log::debug!("Disconnected link for {}", link.document_id());
    }

    pub fn linked_document(&self) -> Option<&DocumentId> {
        self.link.as_ref().map(|link| link.document_id())
    }
}

/// Event sink for a link opened under `guard`.
///
/// Events arriving after the epoch moved on are dropped.
pub(crate) fn link_events(shared: Arc<SharedState>, guard: EpochGuard, id: DocumentId) -> EventSink {
    let offline = Arc::new(AtomicBool::new(false));
    EventSink::new(move |event| {
        let next = match &event {
            TransportEvent::Connecting => ConnectionState::Connecting,
            TransportEvent::Connected | TransportEvent::Synced => ConnectionState::Connected,
            TransportEvent::Disconnected => ConnectionState::Disconnected,
            TransportEvent::Error(reason) => {
                log::warn!("Link for {id} reported an error: {reason}");
                ConnectionState::Error
            }
        };

        let applied = shared.update_if_current(&guard, |status| {
            if status.connection == next {
                return false;
            }
            status.connection = next;
            true
        });
        if !applied {
            log::trace!("Dropping stale {event:?} for {id}");
            return;
        }

        if next.is_offline() && !offline.swap(true, Ordering::AcqRel) {
            shared.notify_if_current(&guard, SessionNotice::Offline { id: id.clone() });
        } else if next == ConnectionState::Connected && offline.swap(false, Ordering::AcqRel) {
            shared.notify_if_current(&guard, SessionNotice::Online { id: id.clone() });
        }
    })
}
