//! Activation epochs.
//!
//! Every switch advances the epoch. Asynchronous callbacks capture an
//! `EpochGuard` when they are created and act only while it is current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct EpochCounter(Arc<AtomicU64>);

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move to the next epoch and return a guard for it.
    pub fn advance(&self) -> EpochGuard {
        let epoch = self.0.fetch_add(1, Ordering::AcqRel) + 1;
        EpochGuard {
            counter: self.clone(),
            epoch,
        }
    }

    pub fn guard(&self) -> EpochGuard {
        EpochGuard {
            counter: self.clone(),
            epoch: self.current(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpochGuard {
    counter: EpochCounter,
    epoch: u64,
}

impl EpochGuard {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        self.counter.current() == self.epoch
    }
}
