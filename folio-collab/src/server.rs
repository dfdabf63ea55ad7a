//! WebSocket relay server with room-based document routing.
//!
//! Architecture:
//! ```text
//! Link A ──┐
//!           ├── Room (doc_id) ── Replica ── broadcast::Sender
//! Link B ──┘                                   │
//!                                   ┌──────────┴───────────┐
//!                                   ▼                      ▼
//!                                Link A                 Link B
//! ```
//!
//! Each room holds an authoritative replica, answers sync step 1 with a
//! diff, and fans deltas out to every other peer in the room. Rooms are
//! dropped once their last peer leaves.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use folio_core::{DocumentId, Replica, UpdateOrigin};
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{send_message, MessageType, ProtocolError, SyncMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Messages buffered per peer before a slow peer starts lagging
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub active_rooms: usize,
}

struct DocumentRoom {
    replica: Arc<Replica>,
    sender: broadcast::Sender<Arc<SyncMessage>>,
    peers: usize,
}

impl DocumentRoom {
    fn new(id: DocumentId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            replica: Arc::new(Replica::new(id)),
            sender,
            peers: 0,
        }
    }
}

type Rooms = Arc<RwLock<HashMap<DocumentId, DocumentRoom>>>;

/// The relay server.
pub struct SyncServer {
    config: ServerConfig,
    rooms: Rooms,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(&self) -> Result<(), ProtocolError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ProtocolError> {
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| ProtocolError::Connect(e.to_string()))?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let capacity = self.config.broadcast_capacity;
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, capacity).await {
                    log::warn!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Rooms,
        stats: Arc<RwLock<ServerStats>>,
        capacity: usize,
    ) -> Result<(), ProtocolError> {
        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut joined: Option<(Uuid, DocumentId, Arc<Replica>)> = None;
        let mut room_rx: Option<broadcast::Receiver<Arc<SyncMessage>>> = None;

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        let sync_msg = match SyncMessage::decode(&bytes) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Failed to decode message from {addr}: {e}");
                                continue;
                            }
                        };
                        stats.write().await.total_messages += 1;

                        match sync_msg.msg_type {
                            MessageType::PeerJoined if joined.is_none() => {
                                let (replica, rx) = Self::join_room(&rooms, &sync_msg, capacity).await;
                                let room_count = rooms.read().await.len();
                                stats.write().await.active_rooms = room_count;

                                // Ask the peer for whatever the room is missing.
                                let step1 = SyncMessage::sync_step1(
                                    Uuid::nil(),
                                    sync_msg.doc_id.clone(),
                                    replica.state_vector(),
                                );
                                if let Err(e) = send_message(&mut ws_sender, &step1).await {
                                    break Err(e);
                                }
                                log::info!("Peer {} joined doc {}", sync_msg.peer_id, sync_msg.doc_id);
                                joined = Some((sync_msg.peer_id, sync_msg.doc_id, replica));
                                room_rx = Some(rx);
                            }
                            MessageType::SyncStep1 => {
                                let Some((_, doc_id, replica)) = &joined else { continue };
                                match replica.encode_diff(&sync_msg.payload) {
                                    Ok(diff) => {
                                        let reply = SyncMessage::sync_step2(Uuid::nil(), doc_id.clone(), diff);
                                        if let Err(e) = send_message(&mut ws_sender, &reply).await {
                                            break Err(e);
                                        }
                                    }
                                    Err(e) => log::warn!("Bad state vector from {addr}: {e}"),
                                }
                            }
                            MessageType::SyncStep2 | MessageType::Delta => {
                                let Some((peer_id, doc_id, replica)) = &joined else { continue };
                                if let Err(e) = replica.apply_update(&sync_msg.payload, UpdateOrigin::Remote) {
                                    log::warn!("Rejected update from {addr}: {e}");
                                    continue;
                                }
                                let relay = SyncMessage::delta(*peer_id, doc_id.clone(), sync_msg.clock, sync_msg.payload);
                                Self::broadcast(&rooms, doc_id, relay).await;
                            }
                            MessageType::Ping => {
                                if let Err(e) = send_message(&mut ws_sender, &SyncMessage::pong(Uuid::nil())).await {
                                    break Err(e);
                                }
                            }
                            other => log::debug!("Unhandled message type {other:?} from {addr}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(ProtocolError::Connect(e.to_string())),
                },

                relayed = async {
                    match room_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => match relayed {
                    Ok(msg) => {
                        if joined.as_ref().is_some_and(|(peer_id, _, _)| *peer_id == msg.peer_id) {
                            continue;
                        }
                        if let Err(e) = send_message(&mut ws_sender, &msg).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Peer at {addr} lagged by {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                },
            }
        };

        if let Some((peer_id, doc_id, _)) = joined {
            Self::leave_room(&rooms, peer_id, &doc_id).await;
        }
        {
            let room_count = rooms.read().await.len();
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = room_count;
        }
        result
    }

    async fn join_room(
        rooms: &Rooms,
        msg: &SyncMessage,
        capacity: usize,
    ) -> (Arc<Replica>, broadcast::Receiver<Arc<SyncMessage>>) {
        let mut rooms_w = rooms.write().await;
        let room = rooms_w
            .entry(msg.doc_id.clone())
            .or_insert_with(|| DocumentRoom::new(msg.doc_id.clone(), capacity));
        room.peers += 1;
        (room.replica.clone(), room.sender.subscribe())
    }

    async fn broadcast(rooms: &Rooms, doc_id: &DocumentId, msg: SyncMessage) {
        let rooms_r = rooms.read().await;
        if let Some(room) = rooms_r.get(doc_id) {
            // No receivers is fine: the sender is alone in the room.
            let _ = room.sender.send(Arc::new(msg));
        }
    }

    async fn leave_room(rooms: &Rooms, peer_id: Uuid, doc_id: &DocumentId) {
        let mut rooms_w = rooms.write().await;
        let Some(room) = rooms_w.get_mut(doc_id) else {
            return;
        };
        room.peers = room.peers.saturating_sub(1);
        let _ = room.sender.send(Arc::new(SyncMessage::peer_left(peer_id, doc_id.clone())));
        if room.peers == 0 {
            if let Some(room) = rooms_w.remove(doc_id) {
                let _ = room.replica.destroy();
            }
            log::info!("Room {doc_id} removed (empty)");
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Current content of a room, if it is open.
    pub async fn room_content(&self, doc_id: &DocumentId) -> Option<String> {
        self.rooms.read().await.get(doc_id).map(|room| room.replica.content())
    }
}
