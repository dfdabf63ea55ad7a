//! # folio-collab: network and disk plumbing for Folio documents
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ WsTransport │ ◄────────────────► │ SyncServer  │
//! │ (per doc)   │    Binary Proto    │ (relay)     │
//! └──────┬──────┘                    └──────┬──────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌─────────────┐
//! │ Replica     │                    │ Room replica│
//! └──────┬──────┘                    └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ LocalStore  │  RocksDB / in-memory
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded `SyncMessage`)
//! - [`transport`]: `SyncTransport` / `SyncLink` contract and link events
//! - [`client`]: WebSocket transport with offline queue and reconnect backoff
//! - [`server`]: WebSocket relay server
//! - [`storage`]: durable local caches

pub mod client;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transport;

pub use client::{OfflineQueue, TransportConfig, WsLink, WsTransport};
pub use protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use storage::{
    LocalStore, LocalStoreHandle, MemoryStore, ReadySignal, RocksStore, StoreConfig, StoreError,
};
pub use transport::{EventSink, SyncLink, SyncTransport, TransportEvent};
