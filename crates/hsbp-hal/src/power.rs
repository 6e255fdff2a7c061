//! Power-state oracle.
//!
//! CPLD registers are only reachable while board power is on, so the poll
//! loop and indicator writes consult a [`PowerOracle`] first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether board power is present.
pub trait PowerOracle: Send + Sync {
    fn power_on(&self) -> bool;
}

/// A [`PowerOracle`] backed by a shared flag that a power-state watcher (or
/// a test) flips.
#[derive(Debug, Clone)]
pub struct SharedPowerState(Arc<AtomicBool>);

impl SharedPowerState {
    pub fn new(on: bool) -> Self {
        Self(Arc::new(AtomicBool::new(on)))
    }

    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }
}

impl PowerOracle for SharedPowerState {
    fn power_on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
