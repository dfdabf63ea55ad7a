//! First-run fallback content for empty documents.

use std::sync::Arc;
use std::time::Duration;

use folio_core::Replica;

use crate::editor::EditorView;
use crate::epoch::EpochGuard;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// The replica already had content; nothing was written
    AlreadyPopulated,
    /// No initial content was supplied
    NothingToWrite,
    Written { attempts: u32 },
    /// The editor never became ready; the document stays empty
    GaveUp { attempts: u32 },
    /// Another document was activated first
    Stale,
}

pub struct Hydrator {
    policy: RetryPolicy,
}

impl Hydrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Write `initial` into `replica` through `editor` if the replica is empty.
    ///
    /// Callers must only invoke this once local persistence has replayed.
    pub async fn maybe_hydrate(
        &self,
        editor: &dyn EditorView,
        replica: &Arc<Replica>,
        initial: Option<&str>,
        guard: &EpochGuard,
    ) -> HydrationOutcome {
        let Some(initial) = initial.filter(|content| !content.is_empty()) else {
            return HydrationOutcome::NothingToWrite;
        };

        let mut attempts = 0;
        loop {
            if !guard.is_current() || replica.is_destroyed() {
                return HydrationOutcome::Stale;
            }
            if !replica.is_empty() {
                log::debug!("Skipping hydration of {}: content already present", replica.id());
                return HydrationOutcome::AlreadyPopulated;
            }

            attempts += 1;
            let attached = editor.attached_instance() == Some(replica.instance());
            if editor.is_ready() && attached {
                match editor.fill_if_empty(initial) {
                    Ok(true) => {
                        log::debug!("Hydrated {} after {attempts} attempt(s)", replica.id());
                        return HydrationOutcome::Written { attempts };
                    }
                    Ok(false) => {
                        log::debug!("Skipping hydration of {}: content arrived first", replica.id());
                        return HydrationOutcome::AlreadyPopulated;
                    }
                    Err(e) => log::debug!("Hydration attempt {attempts} for {} failed: {e}", replica.id()),
                }
            }

            if attempts >= self.policy.max_attempts {
                log::warn!(
                    "Giving up hydrating {} after {attempts} attempts; leaving it empty",
                    replica.id()
                );
                return HydrationOutcome::GaveUp { attempts };
            }
            tokio::time::sleep(self.policy.delay_for(attempts)).await;
        }
    }
}
