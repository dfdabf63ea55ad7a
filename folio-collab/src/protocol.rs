//! Binary protocol spoken between `WsTransport` links and `SyncServer`.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ doc_id       │ clock    │ payload  │
//! │ 1 byte   │ 16 bytes  │ len + string │ varint   │ variable │
//! └──────────┴───────────┴──────────────┴──────────┴──────────┘
//! ```
//!
//! Handshake: each side sends `SyncStep1` with its state vector and answers
//! the other's with `SyncStep2` carrying the missing updates. Afterwards
//! edits travel as `Delta`.

use folio_core::DocumentId;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Yrs state vector, asking the other side for what we lack
    SyncStep1 = 1,
    /// Yrs state diff answering a step 1
    SyncStep2 = 2,
    /// Incremental CRDT update
    Delta = 3,
    PeerJoined = 5,
    PeerLeft = 6,
    Ping = 7,
    Pong = 8,
}

/// Peer identity announced when joining a document room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
        }
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub doc_id: DocumentId,
    /// Lamport clock for causal ordering
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, peer_id: Uuid, doc_id: DocumentId, clock: u64, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            peer_id,
            doc_id,
            clock,
            payload,
        }
    }

    pub fn delta(peer_id: Uuid, doc_id: DocumentId, clock: u64, update: Vec<u8>) -> Self {
        Self::new(MessageType::Delta, peer_id, doc_id, clock, update)
    }

    pub fn sync_step1(peer_id: Uuid, doc_id: DocumentId, state_vector: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep1, peer_id, doc_id, 0, state_vector)
    }

    pub fn sync_step2(peer_id: Uuid, doc_id: DocumentId, diff: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep2, peer_id, doc_id, 0, diff)
    }

    pub fn peer_joined(doc_id: DocumentId, info: &PeerInfo) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self::new(MessageType::PeerJoined, info.peer_id, doc_id, 0, payload))
    }

    pub fn peer_left(peer_id: Uuid, doc_id: DocumentId) -> Self {
        Self::new(MessageType::PeerLeft, peer_id, doc_id, 0, Vec::new())
    }

    pub fn ping(peer_id: Uuid) -> Self {
        Self::new(MessageType::Ping, peer_id, DocumentId::from(""), 0, Vec::new())
    }

    pub fn pong(peer_id: Uuid) -> Self {
        Self::new(MessageType::Pong, peer_id, DocumentId::from(""), 0, Vec::new())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the peer info carried by a `PeerJoined` message.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.msg_type != MessageType::PeerJoined {
            return Err(ProtocolError::InvalidMessageType(self.msg_type));
        }
        let (info, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(info)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("unexpected message type {0:?}")]
    InvalidMessageType(MessageType),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("replica error: {0}")]
    Replica(#[from] folio_core::CoreError),
}

/// Encode and send one message over a WebSocket sink.
pub(crate) async fn send_message<S>(sink: &mut S, msg: &SyncMessage) -> Result<(), ProtocolError>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    use futures_util::SinkExt;
    let encoded = msg.encode()?;
    sink.send(Message::Binary(encoded.into()))
        .await
        .map_err(|e| ProtocolError::Connect(e.to_string()))
}
