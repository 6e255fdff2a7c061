//! Slot state derivation.
//!
//! Turns the four raw CPLD bitmaps into per-slot semantic state and decides
//! whether anything changed since the previous poll.  Pure functions only;
//! no I/O, no publication.
//!
//! # Derivation
//!
//! For slot `ii`:
//!
//! | Field | Rule |
//! |---|---|
//! | `nvme` | `ifdet[ii] xor presence[ii]` (NVMe drives assert IFDETn but not PRSNTn) |
//! | `present` | `nvme or presence[ii]` |
//! | `failed` | `!present or failed[ii]` |
//! | `rebuilding` | `present and rebuilding[ii]` |
//!
//! The rebuilding rule is the same at creation and on every update: an empty
//! bay is never reported as rebuilding.

use hsbp_hal::RegisterSnapshot;
use hsbp_types::SLOTS_PER_BACKPLANE;

/// Semantic state of one drive bay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotState {
    pub present: bool,
    pub nvme: bool,
    pub failed: bool,
    pub rebuilding: bool,
}

impl SlotState {
    pub fn functional(&self) -> bool {
        !self.failed
    }
}

/// Derive the state of slot `ii` from `snapshot`.
pub fn derive_slot(snapshot: &RegisterSnapshot, ii: usize) -> SlotState {
    let bit = |mask: u8| mask & (1 << ii) != 0;
    let nvme = bit(snapshot.ifdet ^ snapshot.presence);
    let present = nvme || bit(snapshot.presence);
    SlotState {
        present,
        nvme,
        failed: !present || bit(snapshot.failed),
        rebuilding: present && bit(snapshot.rebuilding),
    }
}

/// Derive every slot of a backplane.
pub fn derive_slots(snapshot: &RegisterSnapshot) -> [SlotState; SLOTS_PER_BACKPLANE] {
    std::array::from_fn(|ii| derive_slot(snapshot, ii))
}

/// Result of comparing two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub slots: [SlotState; SLOTS_PER_BACKPLANE],
    /// `true` iff any raw bitmap differs.
    pub changed: bool,
}

pub fn transition(prev: &RegisterSnapshot, next: &RegisterSnapshot) -> Transition {
    Transition {
        slots: derive_slots(next),
        changed: prev != next,
    }
}

/// Offset of a backplane's first slot in the global drive numbering.
pub fn global_offset(backplane_index: u64) -> usize {
    (backplane_index.saturating_sub(1) as usize) * SLOTS_PER_BACKPLANE
}

/// 1-based global drive number of local slot `slot`.
pub fn global_slot_index(backplane_index: u64, slot: usize) -> usize {
    global_offset(backplane_index) + slot + 1
}
