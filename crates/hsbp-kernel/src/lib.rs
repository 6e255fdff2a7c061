//! `hsbp-kernel` – Backplane state and correlation
//!
//! Everything the manager task owns lives here.  None of these types spawn
//! work of their own except [`TopologyResolver`], which fans mux property
//! fetches out and joins them with a [`CountdownLatch`].
//!
//! # Modules
//!
//! - [`slot_state`] – derives per-slot presence / NVMe / failed / rebuilding
//!   state from the raw CPLD bitmaps and the global drive numbering.
//! - [`drive_registry`] – [`DriveRegistry`][drive_registry::DriveRegistry]:
//!   the published drive and indicator entities of one backplane, plus the
//!   [`OwnerlessPool`][drive_registry::OwnerlessPool] for drives no backplane
//!   claims.
//! - [`backplane`] – [`Backplane`][backplane::Backplane]: bring-up, polling
//!   and teardown of one CPLD.
//! - [`topology`] – [`TopologyResolver`][topology::TopologyResolver]: the
//!   ordered mux set behind a backplane and its channel offsets.
//! - [`correlator`] – [`AssetCorrelator`][correlator::AssetCorrelator]: maps
//!   externally reported drives to backplane slots.
//! - [`debounce`] – [`Debouncer`][debounce::Debouncer]: coalesces bursts of
//!   change notifications into one rediscovery.
//! - [`latch`] – [`CountdownLatch`][latch::CountdownLatch].

pub mod backplane;
pub mod correlator;
pub mod debounce;
pub mod drive_registry;
pub mod latch;
pub mod slot_state;
pub mod topology;

pub use backplane::{Backplane, BackplaneState, PollOutcome};
pub use correlator::{AssetCorrelator, CorrelationSummary, InventoryReport, Placement};
pub use debounce::{Debouncer, is_rediscovery_trigger};
pub use drive_registry::{DriveRegistry, OwnerlessPool};
pub use latch::CountdownLatch;
pub use slot_state::{SlotState, derive_slots, global_slot_index};
pub use topology::{Mux, MuxSet, TopologyResolver};
