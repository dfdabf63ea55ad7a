//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use folio_collab::{
    EventSink, LocalStore, LocalStoreHandle, ProtocolError, ReadySignal, StoreError, SyncLink,
    SyncTransport, TransportEvent,
};
use folio_core::{DocumentId, DocumentMeta, Replica, UpdateOrigin};
use folio_session::{
    DocumentSource, InMemoryDocuments, ReplicaEditor, SessionConfig, SessionManager, SessionNotice,
    SessionStatus,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What a `MockTransport` link does when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScript {
    /// Connecting, Connected, Synced
    ConnectImmediately,
    /// Connecting, Error
    FailImmediately,
    /// Connecting, then nothing until the test emits more
    Hold,
    /// `open` never returns
    HangOpen,
    /// `open` takes this many milliseconds, then connects
    SlowOpen(u64),
}

pub struct OpenedLink {
    pub id: DocumentId,
    pub replica: Arc<Replica>,
    pub events: EventSink,
}

/// Scriptable in-process transport.
pub struct MockTransport {
    default_script: LinkScript,
    scripts: Mutex<HashMap<DocumentId, LinkScript>>,
    remote: Mutex<HashMap<DocumentId, Vec<u8>>>,
    live: Arc<AtomicUsize>,
    opened: Mutex<Vec<Arc<OpenedLink>>>,
}

impl MockTransport {
    pub fn new(default_script: LinkScript) -> Arc<Self> {
        Arc::new(Self {
            default_script,
            scripts: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashMap::new()),
            live: Arc::new(AtomicUsize::new(0)),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, id: &str, script: LinkScript) {
        self.scripts.lock().insert(DocumentId::from(id), script);
    }

    /// Content the "server" delivers once a link for `id` connects.
    pub fn remote_content(&self, id: &str, content: &str) {
        let scratch = Replica::new(DocumentId::from(id));
        scratch.insert(0, content).unwrap();
        self.remote
            .lock()
            .insert(DocumentId::from(id), scratch.encode_state().unwrap());
    }

    pub fn live_links(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last_link(&self) -> Arc<OpenedLink> {
        self.opened.lock().last().cloned().expect("no link opened yet")
    }

    pub fn links_for(&self, id: &str) -> Vec<Arc<OpenedLink>> {
        let id = DocumentId::from(id);
        self.opened.lock().iter().filter(|l| l.id == id).cloned().collect()
    }

    /// Replicas ever handed to this transport for `id` that are still live.
    pub fn live_replicas_for(&self, id: &str) -> usize {
        self.links_for(id)
            .iter()
            .filter(|l| !l.replica.is_destroyed())
            .count()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn open(
        &self,
        _endpoint: &str,
        id: &DocumentId,
        replica: Arc<Replica>,
        events: EventSink,
    ) -> Result<Box<dyn SyncLink>, ProtocolError> {
        let script = self
            .scripts
            .lock()
            .get(id)
            .copied()
            .unwrap_or(self.default_script);
        match script {
            LinkScript::HangOpen => std::future::pending::<()>().await,
            LinkScript::SlowOpen(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            _ => {}
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().push(Arc::new(OpenedLink {
            id: id.clone(),
            replica: replica.clone(),
            events: events.clone(),
        }));

        events.emit(TransportEvent::Connecting);
        match script {
            LinkScript::ConnectImmediately | LinkScript::SlowOpen(_) => {
                let remote = self.remote.lock().get(id).cloned();
                if let Some(update) = remote {
                    replica.apply_update(&update, UpdateOrigin::Remote)?;
                }
                events.emit(TransportEvent::Connected);
                events.emit(TransportEvent::Synced);
            }
            LinkScript::FailImmediately => {
                events.emit(TransportEvent::Error("connection refused".into()))
            }
            LinkScript::Hold | LinkScript::HangOpen => {}
        }

        Ok(Box::new(MockLink {
            id: id.clone(),
            live: self.live.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockLink {
    id: DocumentId,
    live: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl SyncLink for MockLink {
    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn destroy(&self) -> Result<(), ProtocolError> {
        self.disconnect();
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Local store whose readiness is signalled by the test.
#[derive(Default)]
pub struct ManualStore {
    pending: Mutex<Vec<(DocumentId, ReadySignal)>>,
    failing: Mutex<HashSet<DocumentId>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ManualStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Signal readiness of the oldest pending open of `id`.
    pub fn release(&self, id: &str) -> bool {
        let id = DocumentId::from(id);
        let signal = {
            let mut pending = self.pending.lock();
            pending
                .iter()
                .position(|(pending_id, _)| *pending_id == id)
                .map(|index| pending.remove(index).1)
        };
        match signal {
            Some(signal) => {
                signal.signal();
                true
            }
            None => false,
        }
    }

    pub fn fail_on(&self, id: &str) {
        self.failing.lock().insert(DocumentId::from(id));
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for ManualStore {
    async fn open(
        &self,
        id: &DocumentId,
        _replica: Arc<Replica>,
        ready: ReadySignal,
    ) -> Result<Box<dyn LocalStoreHandle>, StoreError> {
        if self.failing.lock().contains(id) {
            return Err(StoreError::Database("disk unavailable".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push((id.clone(), ready));
        Ok(Box::new(ManualHandle {
            id: id.clone(),
            closed: self.closed.clone(),
            done: AtomicBool::new(false),
        }))
    }
}

struct ManualHandle {
    id: DocumentId,
    closed: Arc<AtomicUsize>,
    done: AtomicBool,
}

#[async_trait]
impl LocalStoreHandle for ManualHandle {
    fn document_id(&self) -> &DocumentId {
        &self.id
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.done.swap(true, Ordering::SeqCst) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub fn documents(entries: &[(&str, Option<&str>)]) -> Arc<InMemoryDocuments> {
    let docs = InMemoryDocuments::new();
    for (id, initial) in entries {
        let meta = match initial {
            Some(content) => DocumentMeta::new(*id).with_initial_content(*content),
            None => DocumentMeta::new(*id),
        };
        docs.insert(meta);
    }
    Arc::new(docs)
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub editor: Arc<ReplicaEditor>,
    pub notices: broadcast::Receiver<SessionNotice>,
}

pub fn harness(
    config: SessionConfig,
    documents: Arc<dyn DocumentSource>,
    transport: Arc<dyn SyncTransport>,
    store: Arc<dyn LocalStore>,
) -> Harness {
    init_logging();
    let editor = Arc::new(ReplicaEditor::new());
    let manager = SessionManager::new(config, editor.clone(), documents, transport, store).unwrap();
    let notices = manager.subscribe_notices();
    Harness {
        manager: Arc::new(manager),
        editor,
        notices,
    }
}

/// Wait for the first notice matching `pred`, skipping others.
pub async fn expect_notice(
    rx: &mut broadcast::Receiver<SessionNotice>,
    pred: impl Fn(&SessionNotice) -> bool,
) -> SessionNotice {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let notice = rx.recv().await.expect("notice channel closed");
            if pred(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

/// Drain notices received so far.
pub fn drain_notices(rx: &mut broadcast::Receiver<SessionNotice>) -> Vec<SessionNotice> {
    let mut seen = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        seen.push(notice);
    }
    seen
}

pub async fn wait_for_status(
    manager: &SessionManager,
    pred: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    let mut rx = manager.subscribe_status();
    let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed")
        .clone();
    status
}
