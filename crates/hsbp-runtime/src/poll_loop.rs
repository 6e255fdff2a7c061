//! Per-backplane poll ticker.
//!
//! A [`PollTimer`] is a small task that sleeps for the poll interval and
//! then posts a [`Command::Poll`] to the manager, forever, until cancelled.
//! The manager does the register reads; the timer only paces them.
//!
//! | Exit | Cause | Logged |
//! |---|---|---|
//! | [`PollExit::Cancelled`] | [`PollTimer::cancel`] or the timer was dropped | no |
//! | [`PollExit::TimerError`] | the tick could not be delivered | yes, `error` |
//!
//! Ticks carry the generation of the backplane they were started for, so a
//! tick that races a rediscovery is recognised and discarded by the manager.

use std::time::Duration;

use hsbp_types::HsbpError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::manager::Command;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Why a poll timer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Cancelled,
    TimerError,
}

pub struct PollTimer {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<PollExit>,
}

impl PollTimer {
    /// Start ticking for `backplane`.  Must be called inside a Tokio runtime.
    pub fn spawn(
        backplane: String,
        generation: u64,
        interval: Duration,
        tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let (cancel, cancelled) = oneshot::channel();
        let handle = tokio::spawn(tick(backplane, generation, interval, tx, cancelled));
        Self {
            cancel: Some(cancel),
            handle,
        }
    }

    /// Stop the timer.  Returns the task handle so callers that care can
    /// wait for it to wind down.
    pub fn cancel(mut self) -> JoinHandle<PollExit> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn tick(
    backplane: String,
    generation: u64,
    interval: Duration,
    tx: mpsc::UnboundedSender<Command>,
    mut cancelled: oneshot::Receiver<()>,
) -> PollExit {
    loop {
        tokio::select! {
            biased;
            // A dropped sender counts as cancellation too.
            _ = &mut cancelled => {
                debug!(%backplane, generation, "poll timer cancelled");
                return PollExit::Cancelled;
            }
            _ = tokio::time::sleep(interval) => {}
        }
        let poll = Command::Poll {
            backplane: backplane.clone(),
            generation,
        };
        if tx.send(poll).is_err() {
            let e = HsbpError::Timer(format!("poll tick for {backplane} could not be delivered"));
            error!(%backplane, generation, error = %e, "polling stopped");
            return PollExit::TimerError;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_interval_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = PollTimer::spawn("HSBP 1".into(), 7, Duration::from_secs(5), tx);

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            match rx.recv().await {
                Some(Command::Poll {
                    backplane,
                    generation,
                }) => {
                    assert_eq!(backplane, "HSBP 1");
                    assert_eq!(generation, 7);
                }
                _ => panic!("expected a poll tick"),
            }
        }
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert_eq!(timer.cancel().await.unwrap(), PollExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = PollTimer::spawn("HSBP 1".into(), 1, Duration::from_secs(5), tx);
        assert_eq!(timer.cancel().await.unwrap(), PollExit::Cancelled);
        // Every sender is gone, and nothing was queued.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_timer_is_a_cancellation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(PollTimer::spawn("HSBP 1".into(), 1, Duration::from_secs(5), tx));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn undeliverable_tick_is_a_timer_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let timer = PollTimer::spawn("HSBP 1".into(), 1, Duration::from_secs(5), tx);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(timer.is_finished());
        assert_eq!(timer.cancel().await.unwrap(), PollExit::TimerError);
    }
}
