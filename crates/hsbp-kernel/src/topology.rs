//! Mux topology resolution.
//!
//! A backplane's sibling configuration objects include the I2C muxes whose
//! channels carry its drives' management buses.  [`TopologyResolver`]
//! enumerates them, fetches each mux's properties concurrently and returns a
//! [`MuxSet`] once every fetch has completed.
//!
//! # Discovery indices
//!
//! Candidates are numbered in the order configuration discovery returns them.
//! Only candidates that implement a supported mux interface consume an index,
//! and a candidate whose property fetch fails still consumes the index it was
//! given, so the numbering never depends on fetch timing.
//!
//! # Channel offsets
//!
//! The drive slot a mux channel maps to is the channel number plus the total
//! channel count of every mux with a smaller discovery index.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use hsbp_middleware::ConfigSource;
use hsbp_types::interfaces::SUPPORTED_MUXES;
use hsbp_types::{HsbpError, MuxDescriptor, parent_path};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::latch::CountdownLatch;

/// One mux as seen by a backplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mux {
    pub bus: u64,
    pub address: u8,
    pub channels: usize,
    /// Discovery order, starting at 0.
    pub index: usize,
}

/// The muxes of one backplane, ordered by discovery index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxSet {
    muxes: BTreeMap<usize, Mux>,
}

impl MuxSet {
    pub fn insert(&mut self, mux: Mux) {
        self.muxes.insert(mux.index, mux);
    }

    pub fn len(&self) -> usize {
        self.muxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.muxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mux> {
        self.muxes.values()
    }

    /// Sum of channel counts of every mux discovered before the mux at
    /// `(bus, address)`, or `None` if no such mux belongs to this set.
    pub fn channel_offset(&self, bus: u64, address: u8) -> Option<usize> {
        let mut offset = 0;
        for mux in self.muxes.values() {
            if mux.bus == bus && mux.address == address {
                return Some(offset);
            }
            offset += mux.channels;
        }
        None
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolves the mux set of a backplane from configuration discovery.
#[derive(Clone)]
pub struct TopologyResolver {
    config: Arc<dyn ConfigSource>,
}

impl TopologyResolver {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }

    /// Enumerate the muxes that are direct children of the parent of
    /// `backplane_path` and fetch them all in parallel.
    ///
    /// Individual fetch failures are logged and leave that mux out of the
    /// set; they do not fail the whole resolution.
    ///
    /// # Errors
    ///
    /// Returns the configuration service's error when the enumeration itself
    /// fails, and [`HsbpError::Directory`] when the fetch tasks are lost
    /// before the set completes.
    pub async fn resolve(&self, backplane_path: &str) -> Result<MuxSet, HsbpError> {
        let root = parent_path(backplane_path);
        let candidates = self.config.subtree(root, 1, &SUPPORTED_MUXES).await?;

        let mut issued = Vec::new();
        for entry in candidates {
            match SUPPORTED_MUXES
                .iter()
                .find(|iface| entry.has_interface(iface))
            {
                Some(&iface) => issued.push((issued.len(), entry, iface)),
                None => warn!(path = %entry.path, "cannot get mux type"),
            }
        }
        if issued.is_empty() {
            debug!(root, "no muxes found");
            return Ok(MuxSet::default());
        }

        let latch = Arc::new(CountdownLatch::new(issued.len()));
        let collected = Arc::new(Mutex::new(MuxSet::default()));
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        for (index, entry, iface) in issued {
            let config = Arc::clone(&self.config);
            let latch = Arc::clone(&latch);
            let collected = Arc::clone(&collected);
            let done_tx = Arc::clone(&done_tx);
            tokio::spawn(async move {
                let fetched = config
                    .properties(&entry, iface)
                    .await
                    .and_then(|props| MuxDescriptor::from_properties(&entry.path, &props));
                match fetched {
                    Ok(desc) => lock(&collected).insert(Mux {
                        bus: desc.bus,
                        address: desc.address,
                        channels: desc.channels,
                        index,
                    }),
                    Err(e) => warn!(path = %entry.path, error = %e, "error getting mux"),
                }
                if latch.count_down() {
                    let set = std::mem::take(&mut *lock(&collected));
                    if let Some(tx) = lock(&done_tx).take() {
                        let _ = tx.send(set);
                    }
                }
            });
        }

        done_rx
            .await
            .map_err(|_| HsbpError::Directory(format!("mux fetch for {root} was abandoned")))
    }
}
