//! Rediscovery debouncing.
//!
//! Configuration and inventory churn arrives in bursts.  Each relevant
//! notification re-arms a single deadline; rediscovery runs only when the
//! deadline expires without being re-armed.  Re-arming is not an error and
//! is never logged as one.

use std::time::Duration;

use hsbp_types::Event;
use hsbp_types::interfaces::{BACKPLANE_CONFIG, NVME_ITEM};
use tokio::time::{Instant, sleep_until};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// `true` for notifications that should schedule rediscovery: backplane
/// configuration or drive inventory changes published by someone other than
/// `own_name`.
pub fn is_rediscovery_trigger(event: &Event, own_name: &str) -> bool {
    event.source != own_name
        && (event.touches_interface(BACKPLANE_CONFIG) || event.touches_interface(NVME_ITEM))
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Push the deadline out to `now + window`.
    pub fn notify(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve once the current deadline passes, disarming the debouncer.
    /// Pending forever while disarmed.  Dropping the future before it
    /// resolves leaves the deadline armed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
