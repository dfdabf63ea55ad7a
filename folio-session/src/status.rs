//! Observable session state and user-facing notices.

use folio_core::DocumentId;
use tokio::sync::{broadcast, watch};

use crate::epoch::{EpochCounter, EpochGuard};
use crate::hydration::HydrationOutcome;

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// Whether the UI should show the offline badge.
    pub fn is_offline(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

/// Snapshot rendered by status indicators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub epoch: u64,
    pub active_id: Option<DocumentId>,
    pub connection: ConnectionState,
    pub persistence_ready: bool,
    pub switching: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Activated { id: DocumentId },
    /// The browser-visible location should now read `path`
    LocationChanged { path: String },
    SwitchRejected { requested: DocumentId },
    SwitchFailed { id: DocumentId, reason: String, fallback_navigation: bool },
    SwitchTimedOut { id: DocumentId },
    /// No endpoint is configured; editing stays on this device
    LocalOnly,
    Hydrated { id: DocumentId, outcome: HydrationOutcome },
    Offline { id: DocumentId },
    Online { id: DocumentId },
}

/// State shared between the manager and the callbacks it hands out.
///
/// Epoch advances happen inside `send_modify` and epoch checks inside
/// `send_if_modified`, so a stale callback can never interleave with the
/// switch that made it stale.
pub(crate) struct SharedState {
    epoch: EpochCounter,
    status: watch::Sender<SessionStatus>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            epoch: EpochCounter::new(),
            status,
            notices,
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Start a new epoch, applying `reset` to the status in the same step.
    pub(crate) fn advance(&self, reset: impl FnOnce(&mut SessionStatus)) -> EpochGuard {
        let mut guard = None;
        self.status.send_modify(|status| {
            let next = self.epoch.advance();
            status.epoch = next.epoch();
            reset(status);
            guard = Some(next);
        });
        guard.unwrap_or_else(|| self.epoch.guard())
    }

    /// Unconditional status change that keeps the current epoch.
    pub(crate) fn modify(&self, f: impl FnOnce(&mut SessionStatus)) {
        self.status.send_modify(f);
    }

    /// Apply `f` only while `guard` is current. `f` returns whether it changed anything.
    pub(crate) fn update_if_current(
        &self,
        guard: &EpochGuard,
        f: impl FnOnce(&mut SessionStatus) -> bool,
    ) -> bool {
        let mut applied = false;
        self.status.send_if_modified(|status| {
            if status.epoch != guard.epoch() {
                return false;
            }
            applied = true;
            f(status)
        });
        applied
    }

    pub(crate) fn notify(&self, notice: SessionNotice) {
        // Nobody listening is fine.
        let _ = self.notices.send(notice);
    }

    pub(crate) fn notify_if_current(&self, guard: &EpochGuard, notice: SessionNotice) {
        if guard.is_current() {
            self.notify(notice);
        }
    }
}
