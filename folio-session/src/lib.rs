//! # folio-session: collaborative document session manager
//!
//! Keeps one editable document synchronized with its shared replica while
//! the user switches between documents, goes offline and comes back.
//!
//! ```text
//!                 activate(id)
//!                      │
//!              ┌───────▼────────┐
//!              │ SessionManager │──── status (watch) / notices (broadcast)
//!              └───────┬────────┘
//!    ┌─────────┬───────┼────────────┬─────────────┐
//!    ▼         ▼       ▼            ▼             ▼
//! Replica  Connection Persistence History      Hydrator
//!  Store   Controller  Adapter    Controller
//! ```
//!
//! Every switch advances an epoch; callbacks from links, stores and
//! hydration tasks of an earlier epoch are dropped.

pub mod config;
pub mod connection;
pub mod editor;
pub mod epoch;
pub mod error;
pub mod history;
pub mod hydration;
pub mod manager;
pub mod persistence;
pub mod replicas;
pub mod source;
pub mod status;

pub use config::SessionConfig;
pub use connection::ConnectionController;
pub use editor::{EditorView, ReplicaEditor};
pub use epoch::{EpochCounter, EpochGuard};
pub use error::SessionError;
pub use history::{HistoryController, HistoryHandle};
pub use hydration::{HydrationOutcome, Hydrator, RetryPolicy};
pub use manager::{SessionManager, SwitchOutcome};
pub use persistence::PersistenceAdapter;
pub use replicas::ReplicaStore;
pub use source::{DocumentSource, InMemoryDocuments};
pub use status::{ConnectionState, SessionNotice, SessionStatus};
