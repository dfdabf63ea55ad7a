//! Document switching.
//!
//! ```text
//! activate(id)
//!   │  rejected if another switch is in flight
//!   ├── debounce, fetch metadata        failure: previous session intact
//!   ├── 1. drop link, close store, drop history
//!   ├── 2. clear the view
//!   ├── 3. new epoch: Connecting, persistence not ready
//!   ├── 4. fresh replica, evict excess, attach view
//!   ├── 5. open local store
//!   ├── 6. open link                    bounded by the switch timeout
//!   ├── 7. bind history
//!   └── 8. publish id and location, start hydration and the connect watchdog
//! ```
//!
//! Once accepted, a switch runs on its own task and finishes even if the
//! caller stops waiting for it.
//!
//! A failure in steps 4-7 discards everything the switch opened and leaves
//! no document active. A link that opens but never reports `Connected` or
//! `Error` within the switch timeout only earns a `SwitchTimedOut` notice:
//! the session stays usable offline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use folio_collab::{LocalStore, SyncTransport};
use folio_core::{DocumentId, DocumentMeta, Replica};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::connection::{link_events, ConnectionController};
use crate::editor::EditorView;
use crate::epoch::EpochGuard;
use crate::error::SessionError;
use crate::history::HistoryController;
use crate::hydration::{HydrationOutcome, Hydrator};
use crate::persistence::{ready_signal, PersistenceAdapter};
use crate::replicas::ReplicaStore;
use crate::source::DocumentSource;
use crate::status::{ConnectionState, SessionNotice, SessionStatus, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Activated { epoch: u64 },
    /// The requested document was already active
    AlreadyActive,
}

struct ActiveDocument {
    id: DocumentId,
    replica: Arc<Replica>,
}

/// Everything bound to the active document. Only touched under the parts lock.
struct SessionParts {
    replicas: ReplicaStore,
    connection: ConnectionController,
    persistence: PersistenceAdapter,
    history: HistoryController,
    active: Option<ActiveDocument>,
    /// Hydration and connect watchdog of the active epoch
    watchers: Vec<JoinHandle<()>>,
}

impl SessionParts {
    fn stop_watchers(&mut self) {
        for task in self.watchers.drain(..) {
            task.abort();
        }
    }

    async fn release_session(&mut self) {
        self.stop_watchers();
        self.connection.disconnect();
        self.persistence.close().await;
        self.history.release();
    }
}

/// Holds the `Switching` state; released on drop.
struct SwitchGate {
    inner: Arc<SessionInner>,
}

impl SwitchGate {
    fn try_acquire(inner: &Arc<SessionInner>) -> Option<Self> {
        inner
            .switching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        inner.shared.modify(|status| status.switching = true);
        Some(Self { inner: inner.clone() })
    }
}

impl Drop for SwitchGate {
    fn drop(&mut self) {
        self.inner.shared.modify(|status| status.switching = false);
        self.inner.switching.store(false, Ordering::Release);
    }
}

pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    shared: Arc<SharedState>,
    editor: Arc<dyn EditorView>,
    documents: Arc<dyn DocumentSource>,
    hydrator: Arc<Hydrator>,
    switching: AtomicBool,
    local_only_announced: AtomicBool,
    shut_down: AtomicBool,
    parts: Mutex<SessionParts>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        editor: Arc<dyn EditorView>,
        documents: Arc<dyn DocumentSource>,
        transport: Arc<dyn SyncTransport>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let parts = SessionParts {
            replicas: ReplicaStore::new(config.max_cached_replicas),
            connection: ConnectionController::new(transport, config.endpoint.clone()),
            persistence: PersistenceAdapter::new(store),
            history: HistoryController::new(),
            active: None,
            watchers: Vec::new(),
        };
        let inner = SessionInner {
            hydrator: Arc::new(Hydrator::new(config.retry_policy())),
            config,
            shared: Arc::new(SharedState::new()),
            editor,
            documents,
            switching: AtomicBool::new(false),
            local_only_announced: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            parts: Mutex::new(parts),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Make `id` the active document.
    ///
    /// Returns `SwitchInProgress` without side effects if another switch has
    /// not finished yet; callers re-issue the request themselves.
    /// Dropping the returned future does not stop an accepted switch.
    pub async fn activate(&self, id: impl Into<DocumentId>) -> Result<SwitchOutcome, SessionError> {
        let id = id.into();
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::Acquire) {
            return Err(SessionError::ShutDown);
        }
        let Some(gate) = SwitchGate::try_acquire(inner) else {
            log::debug!("Rejecting switch to {id}: another switch is in flight");
            inner.shared.notify(SessionNotice::SwitchRejected { requested: id.clone() });
            return Err(SessionError::SwitchInProgress { requested: id });
        };
        if inner.shared.status().active_id.as_ref() == Some(&id) {
            return Ok(SwitchOutcome::AlreadyActive);
        }

        let session = inner.clone();
        let switch = tokio::spawn(async move {
            let result = session.run_switch(id).await;
            drop(gate);
            result
        });
        switch
            .await
            .map_err(|e| SessionError::SwitchAborted(e.to_string()))?
    }

    /// Tear everything down. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await
    }

    /// Undo in the active document. No-op while switching or with nothing to undo.
    pub fn undo(&self) -> bool {
        match self.inner.parts.try_lock() {
            Ok(parts) => parts.history.undo(),
            Err(_) => false,
        }
    }

    pub fn redo(&self) -> bool {
        match self.inner.parts.try_lock() {
            Ok(parts) => parts.history.redo(),
            Err(_) => false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.shared.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.shared.subscribe_status()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.shared.subscribe_notices()
    }

    pub fn is_switching(&self) -> bool {
        self.inner.switching.load(Ordering::Acquire)
    }

    pub async fn active_replica(&self) -> Option<Arc<Replica>> {
        let parts = self.inner.parts.lock().await;
        parts.active.as_ref().map(|active| active.replica.clone())
    }

    /// Cached document ids, most recently activated first.
    pub async fn cached_documents(&self) -> Vec<DocumentId> {
        self.inner.parts.lock().await.replicas.cached_ids()
    }

    pub fn editor(&self) -> &Arc<dyn EditorView> {
        &self.inner.editor
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl SessionInner {
    async fn run_switch(&self, id: DocumentId) -> Result<SwitchOutcome, SessionError> {
        let debounce = self.config.switch_debounce();
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }

        let meta = match self.documents.fetch(&id).await {
            Ok(meta) => meta,
            Err(e) => {
                log::error!("Switch to {id} aborted, previous session kept: {e}");
                self.shared.notify(SessionNotice::SwitchFailed {
                    id,
                    reason: e.to_string(),
                    fallback_navigation: false,
                });
                return Err(e);
            }
        };

        let mut parts = self.parts.lock().await;
        if self.shut_down.load(Ordering::Acquire) {
            return Err(SessionError::ShutDown);
        }
        match self.switch_to(&mut parts, &id, meta).await {
            Ok(epoch) => Ok(SwitchOutcome::Activated { epoch }),
            Err(e) => {
                log::error!("Switch to {id} failed: {e}");
                self.abandon(&mut parts).await;
                if matches!(e, SessionError::SwitchTimedOut(_)) {
                    self.shared.notify(SessionNotice::SwitchTimedOut { id: id.clone() });
                }
                self.shared.notify(SessionNotice::SwitchFailed {
                    id,
                    reason: e.to_string(),
                    fallback_navigation: true,
                });
                Err(e)
            }
        }
    }

    async fn switch_to(
        &self,
        parts: &mut SessionParts,
        id: &DocumentId,
        meta: DocumentMeta,
    ) -> Result<u64, SessionError> {
        log::info!("Switching to {id}");
        parts.release_session().await;
        self.editor.clear_content();

        let guard = self.shared.advance(|status| {
            status.connection = ConnectionState::Connecting;
            status.persistence_ready = false;
        });

        let replica = parts.replicas.acquire(id);
        parts.active = Some(ActiveDocument {
            id: id.clone(),
            replica: replica.clone(),
        });
        let evicted = parts.replicas.evict_excess(id);
        if !evicted.is_empty() {
            log::debug!("Evicted {} cached replica(s)", evicted.len());
        }
        self.editor.attach(replica.clone());

        let ready = ready_signal(self.shared.clone(), guard.clone(), id.clone());
        parts.persistence.open(id, replica.clone(), ready).await?;

        let connect_deadline = if parts.connection.endpoint().is_some() {
            let deadline = Instant::now() + self.config.switch_timeout();
            let events = link_events(self.shared.clone(), guard.clone(), id.clone());
            tokio::time::timeout_at(deadline, parts.connection.connect(id, replica.clone(), events))
                .await
                .map_err(|_| SessionError::SwitchTimedOut(id.clone()))??;
            Some(deadline)
        } else {
            self.shared.update_if_current(&guard, |status| {
                status.connection = ConnectionState::Disconnected;
                true
            });
            self.announce_local_only();
            None
        };

        parts.history.bind(&replica)?;

        self.shared.update_if_current(&guard, |status| {
            status.active_id = Some(id.clone());
            true
        });
        self.shared.notify(SessionNotice::Activated { id: id.clone() });
        self.shared.notify(SessionNotice::LocationChanged {
            path: self.config.location_for(id),
        });
        let initial = meta.initial_content().map(str::to_string);
        parts
            .watchers
            .push(self.spawn_hydration(guard.clone(), replica, initial));
        if let Some(deadline) = connect_deadline {
            parts
                .watchers
                .push(self.spawn_connect_watchdog(guard.clone(), id.clone(), deadline));
        }

        log::info!("Activated {id} (epoch {})", guard.epoch());
        Ok(guard.epoch())
    }

    /// Discard whatever a failed switch opened.
    async fn abandon(&self, parts: &mut SessionParts) {
        self.shared.advance(|status| {
            status.active_id = None;
            status.connection = ConnectionState::Disconnected;
            status.persistence_ready = false;
        });
        parts.release_session().await;
        self.editor.detach();
        if let Some(active) = parts.active.take() {
            parts.replicas.discard(&active.id);
        }
    }

    fn spawn_hydration(
        &self,
        guard: EpochGuard,
        replica: Arc<Replica>,
        initial: Option<String>,
    ) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let editor = self.editor.clone();
        let hydrator = self.hydrator.clone();
        let mut status = self.shared.subscribe_status();

        tokio::spawn(async move {
            let epoch = guard.epoch();
            let ready = status
                .wait_for(|s| s.epoch != epoch || s.persistence_ready)
                .await
                .map(|s| s.epoch == epoch)
                .unwrap_or(false);
            if !ready {
                log::trace!("Hydration of {} superseded before persistence was ready", replica.id());
                return;
            }

            let outcome = hydrator
                .maybe_hydrate(editor.as_ref(), &replica, initial.as_deref(), &guard)
                .await;
            if outcome != HydrationOutcome::Stale {
                shared.notify_if_current(
                    &guard,
                    SessionNotice::Hydrated {
                        id: replica.id().clone(),
                        outcome,
                    },
                );
            }
        })
    }

    /// Report a link that is still `Connecting` at `deadline`.
    fn spawn_connect_watchdog(
        &self,
        guard: EpochGuard,
        id: DocumentId,
        deadline: Instant,
    ) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let mut status = self.shared.subscribe_status();

        tokio::spawn(async move {
            let epoch = guard.epoch();
            let timed_out = tokio::time::timeout_at(
                deadline,
                status.wait_for(|s| {
                    s.epoch != epoch
                        || matches!(s.connection, ConnectionState::Connected | ConnectionState::Error)
                }),
            )
            .await
            .is_err();
            if !timed_out {
                return;
            }

            let current = shared.status();
            if current.epoch == epoch && current.connection == ConnectionState::Connecting {
                log::warn!("Link for {id} did not settle within the switch timeout; editing stays local");
                shared.notify_if_current(&guard, SessionNotice::SwitchTimedOut { id });
            }
        })
    }

    fn announce_local_only(&self) {
        if !self.local_only_announced.swap(true, Ordering::AcqRel) {
            log::warn!("No sync endpoint configured, editing stays local");
            self.shared.notify(SessionNotice::LocalOnly);
        }
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let mut parts = self.parts.lock().await;
        self.shared.advance(|status| {
            let epoch = status.epoch;
            *status = SessionStatus {
                epoch,
                ..SessionStatus::default()
            };
        });
        parts.release_session().await;
        self.editor.detach();
        parts.active = None;
        parts.replicas.destroy_all();
        log::info!("Session manager shut down");
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let parts = self.parts.get_mut();
        parts.stop_watchers();
        parts.connection.disconnect();
    }
}
