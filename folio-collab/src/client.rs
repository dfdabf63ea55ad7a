//! WebSocket transport binding one replica to a `SyncServer` room.
//!
//! Each link runs a single task:
//! - connect to `{endpoint}/{doc_id}`, announce the peer, exchange state vectors
//! - stream local replica updates out, apply remote ones in
//! - on loss, back off (bounded exponential) and retry, queueing local edits
//!
//! Reference: Kleppmann, Chapter 5 (Replication)

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use folio_core::{DocumentId, Replica, UpdateOrigin};
use futures_util::{Sink, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use yrs::Subscription;

use crate::protocol::{send_message, MessageType, PeerInfo, ProtocolError, SyncMessage};
use crate::transport::{EventSink, SyncLink, SyncTransport, TransportEvent};

/// Offline queue for edits made while disconnected.
///
/// Queued deltas are replayed on reconnection.
pub struct OfflineQueue {
    queue: VecDeque<QueuedDelta>,
    max_size: usize,
}

#[derive(Debug, Clone)]
struct QueuedDelta {
    clock: u64,
    payload: Vec<u8>,
    queued_at: Instant,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a delta for later replay. Returns false when full.
    pub fn enqueue(&mut self, clock: u64, payload: Vec<u8>) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedDelta {
            clock,
            payload,
            queued_at: Instant::now(),
        });
        true
    }

    pub fn drain(&mut self) -> Vec<(u64, Vec<u8>)> {
        self.queue
            .drain(..)
            .map(|d| (d.clock, d.payload))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|d| d.payload.len()).sum()
    }

    /// Age of the oldest queued delta.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.queue.front().map(|d| d.queued_at.elapsed())
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// First reconnect delay (default: 250ms)
    pub reconnect_base_ms: u64,
    /// Reconnect delay cap (default: 10s)
    pub reconnect_max_ms: u64,
    /// Max local deltas held while offline (default: 10,000)
    pub offline_queue_capacity: usize,
    /// Display name announced to peers
    pub peer_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 250,
            reconnect_max_ms: 10_000,
            offline_queue_capacity: 10_000,
            peer_name: "folio".to_string(),
        }
    }
}

impl TransportConfig {
    /// Config for testing (fast retries, small queue).
    pub fn for_testing() -> Self {
        Self {
            reconnect_base_ms: 20,
            reconnect_max_ms: 200,
            offline_queue_capacity: 1_000,
            peer_name: "folio-test".to_string(),
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(
            self.reconnect_base_ms
                .saturating_mul(factor)
                .min(self.reconnect_max_ms),
        )
    }
}

/// Opens WebSocket links to a `SyncServer`.
pub struct WsTransport {
    config: TransportConfig,
    peer: PeerInfo,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Self {
        let peer = PeerInfo::new(config.peer_name.clone());
        Self { config, peer }
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer
    }
}

#[async_trait]
impl SyncTransport for WsTransport {
    async fn open(
        &self,
        endpoint: &str,
        id: &DocumentId,
        replica: Arc<Replica>,
        events: EventSink,
    ) -> Result<Box<dyn SyncLink>, ProtocolError> {
        let (update_tx, update_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let subscription = replica.observe_updates(move |update, origin| {
            if origin != UpdateOrigin::Remote {
                let _ = update_tx.send(update.to_vec());
            }
        })?;

        let worker = LinkWorker {
            url: format!("{}/{}", endpoint.trim_end_matches('/'), id),
            doc_id: id.clone(),
            peer: self.peer.clone(),
            replica,
            updates: update_rx,
            events,
            queue: OfflineQueue::new(self.config.offline_queue_capacity),
            config: self.config.clone(),
            clock: 0,
        };
        let task = tokio::spawn(worker.run());

        Ok(Box::new(WsLink {
            doc_id: id.clone(),
            task: Mutex::new(Some(task)),
            subscription: Mutex::new(Some(subscription)),
        }))
    }
}

/// A live WebSocket link. Dropping it disconnects.
pub struct WsLink {
    doc_id: DocumentId,
    task: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl SyncLink for WsLink {
    fn document_id(&self) -> &DocumentId {
        &self.doc_id
    }

    fn disconnect(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            log::debug!("Link for {} disconnected", self.doc_id);
        }
    }

    fn destroy(&self) -> Result<(), ProtocolError> {
        self.disconnect();
        self.subscription.lock().take();
        Ok(())
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct LinkWorker {
    url: String,
    doc_id: DocumentId,
    peer: PeerInfo,
    replica: Arc<Replica>,
    updates: mpsc::UnboundedReceiver<Vec<u8>>,
    events: EventSink,
    queue: OfflineQueue,
    config: TransportConfig,
    clock: u64,
}

impl LinkWorker {
    async fn run(mut self) {
        let mut attempt = 0u32;
        loop {
            self.events.emit(TransportEvent::Connecting);
            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    attempt = 0;
                    log::info!("Link for {} connected to {}", self.doc_id, self.url);
                    self.events.emit(TransportEvent::Connected);
                    match self.session(ws_stream).await {
                        Ok(()) => {
                            log::info!("Link for {} closed by remote", self.doc_id);
                            self.events.emit(TransportEvent::Disconnected);
                        }
                        Err(e) => {
                            log::warn!("Link for {} dropped: {e}", self.doc_id);
                            self.events.emit(TransportEvent::Error(e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Link for {} failed to connect: {e}", self.doc_id);
                    self.events.emit(TransportEvent::Error(e.to_string()));
                }
            }

            let delay = self.config.reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            self.park_updates_for(delay).await;
        }
    }

    /// Wait out a reconnect delay, queueing local edits as they arrive.
    async fn park_updates_for(&mut self, delay: Duration) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                update = self.updates.recv() => match update {
                    Some(update) => self.enqueue(update),
                    None => {
                        (&mut sleep).await;
                        return;
                    }
                },
            }
        }
    }

    fn enqueue(&mut self, update: Vec<u8>) {
        self.clock += 1;
        if !self.queue.enqueue(self.clock, update) {
            // The next handshake still carries the full diff.
            log::warn!("Offline queue full for {}, dropping delta", self.doc_id);
        }
    }

    async fn session(&mut self, ws_stream: ClientStream) -> Result<(), ProtocolError> {
        let (mut writer, mut reader) = ws_stream.split();

        send_message(&mut writer, &SyncMessage::peer_joined(self.doc_id.clone(), &self.peer)?).await?;
        let step1 = SyncMessage::sync_step1(
            self.peer.peer_id,
            self.doc_id.clone(),
            self.replica.state_vector(),
        );
        send_message(&mut writer, &step1).await?;

        let queued = self.queue.drain();
        if !queued.is_empty() {
            log::info!("Replaying {} queued deltas for {}", queued.len(), self.doc_id);
        }
        for (clock, payload) in queued {
            let msg = SyncMessage::delta(self.peer.peer_id, self.doc_id.clone(), clock, payload);
            send_message(&mut writer, &msg).await?;
        }

        loop {
            tokio::select! {
                update = self.updates.recv() => {
                    let Some(update) = update else {
                        return Ok(());
                    };
                    self.clock += 1;
                    let msg = SyncMessage::delta(self.peer.peer_id, self.doc_id.clone(), self.clock, update);
                    if let Err(e) = send_message(&mut writer, &msg).await {
                        self.queue.enqueue(msg.clock, msg.payload);
                        return Err(e);
                    }
                }
                incoming = reader.next() => match incoming {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        self.handle_incoming(&bytes, &mut writer).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ProtocolError::Connect(e.to_string())),
                },
            }
        }
    }

    async fn handle_incoming<W>(&mut self, bytes: &[u8], writer: &mut W) -> Result<(), ProtocolError>
    where
        W: Sink<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let msg = match SyncMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Undecodable message on link for {}: {e}", self.doc_id);
                return Ok(());
            }
        };
        if msg.peer_id == self.peer.peer_id {
            return Ok(());
        }

        match msg.msg_type {
            MessageType::Delta | MessageType::SyncStep2 => {
                if let Err(e) = self.replica.apply_update(&msg.payload, UpdateOrigin::Remote) {
                    log::warn!("Dropping remote update for {}: {e}", self.doc_id);
                }
                if msg.msg_type == MessageType::SyncStep2 {
                    self.events.emit(TransportEvent::Synced);
                }
            }
            MessageType::SyncStep1 => match self.replica.encode_diff(&msg.payload) {
                Ok(diff) => {
                    let reply = SyncMessage::sync_step2(self.peer.peer_id, self.doc_id.clone(), diff);
                    send_message(writer, &reply).await?;
                }
                Err(e) => log::warn!("Cannot answer sync step 1 for {}: {e}", self.doc_id),
            },
            MessageType::Ping => send_message(writer, &SyncMessage::pong(self.peer.peer_id)).await?,
            MessageType::PeerJoined | MessageType::PeerLeft => {
                log::debug!("Peer {} {:?} on {}", msg.peer_id, msg.msg_type, self.doc_id);
            }
            MessageType::Pong => {}
        }
        Ok(())
    }
}
