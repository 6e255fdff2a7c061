//! [`CountdownLatch`] – fires exactly once after a known number of
//! completions.
//!
//! Initialise with the number of operations issued; every completion (good
//! or bad) calls [`CountdownLatch::count_down`].  Exactly one call, the one
//! that takes the count to zero, observes `true`, and that caller runs the
//! continuation.
//!
//! ```
//! use hsbp_kernel::latch::CountdownLatch;
//!
//! let latch = CountdownLatch::new(2);
//! assert!(!latch.count_down());
//! assert!(latch.count_down());
//! // Extra completions never fire twice.
//! assert!(!latch.count_down());
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct CountdownLatch {
    remaining: AtomicUsize,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
        }
    }

    /// Record one completion.  Returns `true` only for the completion that
    /// releases the latch.
    pub fn count_down(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|prev| prev == 1)
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// `true` once every issued operation has completed.
    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }
}
