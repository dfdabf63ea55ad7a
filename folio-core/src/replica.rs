//! In-memory replicated document backed by a Yrs `Doc`.
//!
//! A `Replica` is created fresh on every activation and is never reused:
//! once destroyed it refuses reads that could leak into a later session
//! and every write, so a stale subscription cannot inject content into a
//! document that has since been re-activated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, Origin, ReadTxn, StateVector, Subscription, Text, TextRef, Transact, Update};

use crate::DocumentId;

/// Name of the shared text holding the editable region.
pub const CONTENT_REGION: &str = "default";

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("CRDT error: {0}")]
    Crdt(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("replica for {0} is destroyed")]
    Destroyed(DocumentId),
    #[error("replica for {0} was already destroyed")]
    AlreadyDestroyed(DocumentId),
}

impl From<yrs::encoding::read::Error> for CoreError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        CoreError::Crdt(e.to_string())
    }
}

/// Who produced a transaction on the replica.
///
/// Transactions without an origin are local user edits; those are the only
/// ones the undo manager tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    Local,
    Remote,
    Store,
    Hydration,
}

impl UpdateOrigin {
    const REMOTE: &'static str = "folio.remote";
    const STORE: &'static str = "folio.store";
    const HYDRATION: &'static str = "folio.hydration";

    fn label(self) -> Option<&'static str> {
        match self {
            UpdateOrigin::Local => None,
            UpdateOrigin::Remote => Some(Self::REMOTE),
            UpdateOrigin::Store => Some(Self::STORE),
            UpdateOrigin::Hydration => Some(Self::HYDRATION),
        }
    }

    fn classify(origin: Option<&Origin>) -> Self {
        let Some(origin) = origin else {
            return UpdateOrigin::Local;
        };
        [UpdateOrigin::Remote, UpdateOrigin::Store, UpdateOrigin::Hydration]
            .into_iter()
            .find(|candidate| {
                candidate
                    .label()
                    .is_some_and(|label| *origin == Origin::from(label))
            })
            .unwrap_or(UpdateOrigin::Local)
    }
}

/// One replicated document instance.
pub struct Replica {
    id: DocumentId,
    instance: Uuid,
    doc: Doc,
    content: TextRef,
    created_at: Instant,
    destroyed: AtomicBool,
}

impl Replica {
    pub fn new(id: DocumentId) -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_text(CONTENT_REGION);
        Self {
            id,
            instance: Uuid::new_v4(),
            doc,
            content,
            created_at: Instant::now(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Unique per instance; two activations of the same document differ.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Mark the replica as discarded. Fails if it already was.
    pub fn destroy(&self) -> Result<(), CoreError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(CoreError::AlreadyDestroyed(self.id.clone()));
        }
        log::debug!("Destroyed replica {} ({})", self.id, self.instance);
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), CoreError> {
        if self.is_destroyed() {
            return Err(CoreError::Destroyed(self.id.clone()));
        }
        Ok(())
    }

    /// Underlying Yrs document, for binding undo managers and transports.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// The shared editable region.
    pub fn content_ref(&self) -> &TextRef {
        &self.content
    }

    pub fn content(&self) -> String {
        if self.is_destroyed() {
            return String::new();
        }
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    pub fn content_len(&self) -> u32 {
        let txn = self.doc.transact();
        self.content.len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.content_len() == 0
    }

    /// Insert text as a local (undoable) user edit.
    pub fn insert(&self, index: u32, chunk: &str) -> Result<(), CoreError> {
        self.ensure_live()?;
        let mut txn = self.doc.transact_mut();
        let len = self.content.len(&txn);
        self.content.insert(&mut txn, index.min(len), chunk);
        Ok(())
    }

    /// Replace the whole region in a single transaction tagged with `origin`.
    pub fn replace_content(&self, content: &str, origin: UpdateOrigin) -> Result<(), CoreError> {
        self.ensure_live()?;
        let mut txn = match origin.label() {
            Some(label) => self.doc.transact_mut_with(label),
            None => self.doc.transact_mut(),
        };
        let len = self.content.len(&txn);
        if len > 0 {
            self.content.remove_range(&mut txn, 0, len);
        }
        if !content.is_empty() {
            self.content.insert(&mut txn, 0, content);
        }
        Ok(())
    }

    /// Insert `content` only if the region is empty, checking and writing in
    /// one transaction. Returns `false` and writes nothing if text was already
    /// present.
    pub fn insert_if_empty(&self, content: &str, origin: UpdateOrigin) -> Result<bool, CoreError> {
        self.ensure_live()?;
        let mut txn = match origin.label() {
            Some(label) => self.doc.transact_mut_with(label),
            None => self.doc.transact_mut(),
        };
        if self.content.len(&txn) > 0 {
            return Ok(false);
        }
        if !content.is_empty() {
            self.content.insert(&mut txn, 0, content);
        }
        Ok(true)
    }

    /// Apply an encoded v1 update produced by another replica.
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<(), CoreError> {
        self.ensure_live()?;
        let update = Update::decode_v1(update)?;
        let mut txn = match origin.label() {
            Some(label) => self.doc.transact_mut_with(label),
            None => self.doc.transact_mut(),
        };
        txn.apply_update(update)
            .map_err(|e| CoreError::Crdt(e.to_string()))
    }

    /// Full state encoded as a single v1 update.
    pub fn encode_state(&self) -> Result<Vec<u8>, CoreError> {
        self.ensure_live()?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&StateVector::default()))
    }

    pub fn state_vector(&self) -> Vec<u8> {
        use yrs::updates::encoder::Encode;
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything this replica has that a peer with `state_vector` lacks.
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.ensure_live()?;
        let remote = StateVector::decode_v1(state_vector)?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&remote))
    }

    /// Observe every committed update together with its origin.
    ///
    /// The callback runs inside the committing transaction and must not
    /// open another transaction on this replica.
    pub fn observe_updates<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&[u8], UpdateOrigin) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        self.doc
            .observe_update_v1(move |txn, event| {
                callback(&event.update, UpdateOrigin::classify(txn.origin()));
            })
            .map_err(|e| CoreError::Crdt(format!("{e:?}")))
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
