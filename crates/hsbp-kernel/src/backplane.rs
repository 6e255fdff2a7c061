//! One hot-swap backplane: its CPLD channel, its last register snapshot and
//! the entities it publishes.
//!
//! # Lifecycle
//!
//! ```text
//! Discovering ──bring_up ok──▶ Active ◀──power back on──┐
//!      │                        │                        │
//!      └─bring_up err (absent)   └──power off──▶ Suspended┘
//!
//! any state ──destroy──▶ Destroyed
//! ```
//!
//! An absent backplane never leaves `Discovering` and publishes nothing.

use hsbp_hal::{ChannelOpener, CpldIdentity, HsbpCpld, RegisterSnapshot};
use hsbp_middleware::ObjectDirectory;
use hsbp_types::interfaces::{HSBP_PATH_PREFIX, HSBP_VERSION_PURPOSE, INVENTORY_ITEM, VERSION};
use hsbp_types::{AssetRecord, BackplaneDescriptor, HsbpError, PropertyMap};
use tracing::{debug, info, warn};

use crate::drive_registry::DriveRegistry;
use crate::slot_state::{derive_slots, transition};
use crate::topology::MuxSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackplaneState {
    Discovering,
    Active,
    Suspended,
    Destroyed,
}

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Host power is off; no register was read.
    Skipped,
    Unchanged,
    Updated { writes: usize },
}

/// Object path of a backplane's inventory item.
pub fn backplane_path(name: &str) -> String {
    format!("{HSBP_PATH_PREFIX}{}", name.replace(' ', "_"))
}

pub struct Backplane {
    descriptor: BackplaneDescriptor,
    generation: u64,
    path: String,
    identity: CpldIdentity,
    cpld: HsbpCpld,
    snapshot: RegisterSnapshot,
    registry: DriveRegistry,
    muxes: MuxSet,
    state: BackplaneState,
}

impl Backplane {
    /// Open the CPLD, read its identity and initial state and publish the
    /// backplane item, its version and one drive per slot.
    ///
    /// `generation` tags the backplane with the discovery pass that created
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::HardwareIo`] when the channel cannot be opened or
    /// the CPLD does not answer, and a directory error when publication
    /// fails.  Nothing stays published on error.
    pub fn bring_up(
        descriptor: BackplaneDescriptor,
        generation: u64,
        opener: &dyn ChannelOpener,
        directory: &dyn ObjectDirectory,
    ) -> Result<Self, HsbpError> {
        debug!(backplane = %descriptor.name, bus = descriptor.bus, address = descriptor.address, "discovering backplane");
        let mut cpld = HsbpCpld::new(opener.open(descriptor.bus, descriptor.address)?);
        cpld.probe()?;

        let identity = cpld.read_identity();
        let version = identity.version_string();
        info!(
            backplane = %descriptor.name,
            type_id = identity.type_id,
            %version,
            "backplane present"
        );

        let path = backplane_path(&descriptor.name);
        let mut item = PropertyMap::new();
        item.insert("Present".into(), true.into());
        item.insert("PrettyName".into(), descriptor.name.clone().into());
        directory.add_interface(&path, INVENTORY_ITEM, item)?;

        let mut ver = PropertyMap::new();
        ver.insert("Version".into(), version.into());
        ver.insert("Purpose".into(), HSBP_VERSION_PURPOSE.into());
        if let Err(e) = directory.add_interface(&path, VERSION, ver) {
            directory.remove_interface(&path, INVENTORY_ITEM);
            return Err(e);
        }

        let snapshot = cpld.read_snapshot(RegisterSnapshot::default());
        let registry = match DriveRegistry::create(
            directory,
            &mut cpld,
            descriptor.index,
            &derive_slots(&snapshot),
        ) {
            Ok(r) => r,
            Err(e) => {
                directory.remove_interface(&path, VERSION);
                directory.remove_interface(&path, INVENTORY_ITEM);
                return Err(e);
            }
        };

        Ok(Self {
            descriptor,
            generation,
            path,
            identity,
            cpld,
            snapshot,
            registry,
            muxes: MuxSet::default(),
            state: BackplaneState::Active,
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn index(&self) -> u64 {
        self.descriptor.index
    }

    pub fn descriptor(&self) -> &BackplaneDescriptor {
        &self.descriptor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn identity(&self) -> CpldIdentity {
        self.identity
    }

    pub fn version(&self) -> String {
        self.identity.version_string()
    }

    pub fn state(&self) -> BackplaneState {
        self.state
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        self.snapshot
    }

    pub fn registry(&self) -> &DriveRegistry {
        &self.registry
    }

    pub fn drive_count(&self) -> usize {
        self.registry.len()
    }

    /// Local slot of the drive published at `path`, if it is ours.
    pub fn slot_of(&self, path: &str) -> Option<usize> {
        self.registry.slot_of(path)
    }

    pub fn muxes(&self) -> &MuxSet {
        &self.muxes
    }

    pub fn set_muxes(&mut self, muxes: MuxSet) {
        debug!(backplane = %self.descriptor.name, count = muxes.len(), "mux topology resolved");
        self.muxes = muxes;
    }

    /// One poll tick.  With host power off nothing is read; otherwise the
    /// four bitmaps are read and entities are updated only when at least one
    /// of them changed.
    pub fn poll(&mut self, power_on: bool, directory: &dyn ObjectDirectory) -> PollOutcome {
        if self.state == BackplaneState::Destroyed {
            return PollOutcome::Skipped;
        }
        if !power_on {
            if self.state != BackplaneState::Suspended {
                debug!(backplane = %self.descriptor.name, "host power off; polling suspended");
                self.state = BackplaneState::Suspended;
            }
            return PollOutcome::Skipped;
        }
        if self.state == BackplaneState::Suspended {
            debug!(backplane = %self.descriptor.name, "host power on; polling resumed");
        }
        self.state = BackplaneState::Active;

        let next = self.cpld.read_snapshot(self.snapshot);
        let t = transition(&self.snapshot, &next);
        self.snapshot = next;
        // Drives whose last update failed are retried even when the
        // registers did not move.
        let writes = self.registry.apply(directory, &t.slots);
        if !t.changed && writes == 0 {
            return PollOutcome::Unchanged;
        }
        debug!(backplane = %self.descriptor.name, writes, "slot state changed");
        PollOutcome::Updated { writes }
    }

    /// # Errors
    ///
    /// See [`DriveRegistry::attach_asset`].
    pub fn attach_asset(
        &mut self,
        directory: &dyn ObjectDirectory,
        slot: usize,
        record: AssetRecord,
    ) -> Result<bool, HsbpError> {
        self.registry.attach_asset(directory, slot, record)
    }

    /// # Errors
    ///
    /// See [`DriveRegistry::set_indicator`].
    pub fn set_indicator(
        &mut self,
        directory: &dyn ObjectDirectory,
        power_on: bool,
        slot: usize,
        asserted: bool,
    ) -> Result<(), HsbpError> {
        if self.state == BackplaneState::Destroyed {
            return Err(HsbpError::Rejected(format!(
                "backplane {} is gone",
                self.descriptor.name
            )));
        }
        self.registry
            .set_indicator(directory, &mut self.cpld, power_on, slot, asserted)
    }

    /// Retract everything this backplane published.
    pub fn destroy(&mut self, directory: &dyn ObjectDirectory) {
        if self.state == BackplaneState::Destroyed {
            return;
        }
        self.registry.retract(directory);
        if !directory.remove_interface(&self.path, VERSION) {
            warn!(path = %self.path, "version was not published");
        }
        directory.remove_interface(&self.path, INVENTORY_ITEM);
        self.state = BackplaneState::Destroyed;
        debug!(backplane = %self.descriptor.name, "backplane destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_registry::drive_path;
    use crate::drive_registry::tests::RecordingDirectory;
    use hsbp_hal::registers::{REG_FAILED, REG_IFDET, REG_PRESENCE, REG_REBUILD};
    use hsbp_hal::{SimBank, SimChannelOpener};
    use hsbp_types::PropertyValue;
    use hsbp_types::interfaces::OPERATIONAL_STATUS;

    fn descriptor() -> BackplaneDescriptor {
        BackplaneDescriptor {
            path: "/board/hsbp_1".into(),
            bus: 4,
            address: 0x20,
            index: 1,
            name: "Front Backplane".into(),
        }
    }

    fn bank() -> SimBank {
        let bank = SimBank::default();
        bank.set_versions(1, 2, 3);
        bank.set_presence(0b0000_0011);
        bank.set_ifdet(0b0000_0011);
        bank
    }

    #[test]
    fn bring_up_publishes_item_version_and_drives() -> Result<(), Box<dyn std::error::Error>> {
        let dir = RecordingDirectory::new();
        let bank = bank();
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank.clone());
        let bp = Backplane::bring_up(descriptor(), 1, &opener, &dir)?;

        assert_eq!(bp.state(), BackplaneState::Active);
        assert_eq!(bp.path(), "/xyz/openbmc_project/inventory/item/hsbp/Front_Backplane");
        assert_eq!(
            dir.inner.get_property(bp.path(), VERSION, "Version"),
            Some(PropertyValue::Str("01.02.03".into()))
        );
        assert_eq!(
            dir.inner.get_property(bp.path(), VERSION, "Purpose"),
            Some(PropertyValue::Str(HSBP_VERSION_PURPOSE.into()))
        );
        assert_eq!(
            dir.inner.get_property(bp.path(), INVENTORY_ITEM, "PrettyName"),
            Some(PropertyValue::Str("Front Backplane".into()))
        );
        assert_eq!(bp.drive_count(), 8);
        assert_eq!(
            dir.inner.get_property(&drive_path(2), INVENTORY_ITEM, "Present"),
            Some(PropertyValue::Bool(true))
        );

        // Initial read covers all four bitmaps.
        let reads = bank.reads();
        for reg in [REG_PRESENCE, REG_IFDET, REG_FAILED, REG_REBUILD] {
            assert!(reads.contains(&reg), "register {reg:#x} not read");
        }
        Ok(())
    }

    #[test]
    fn absent_backplane_publishes_nothing() {
        let dir = RecordingDirectory::new();
        let bank = bank();
        bank.set_absent(true);
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank);
        assert!(matches!(
            Backplane::bring_up(descriptor(), 1, &opener, &dir),
            Err(HsbpError::HardwareIo { .. })
        ));
        assert!(dir.inner.object_paths().is_empty());
    }

    #[test]
    fn missing_channel_is_hardware_error() {
        let dir = RecordingDirectory::new();
        let opener = SimChannelOpener::new();
        assert!(matches!(
            Backplane::bring_up(descriptor(), 1, &opener, &dir),
            Err(HsbpError::HardwareIo { .. })
        ));
    }

    #[test]
    fn identical_polls_issue_no_updates() -> Result<(), Box<dyn std::error::Error>> {
        let dir = RecordingDirectory::new();
        let bank = bank();
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank.clone());
        let mut bp = Backplane::bring_up(descriptor(), 1, &opener, &dir)?;

        assert_eq!(bp.poll(true, &dir), PollOutcome::Unchanged);
        assert_eq!(bp.poll(true, &dir), PollOutcome::Unchanged);
        assert_eq!(dir.set_count(), 0);

        bank.set_failed(0b10);
        assert_eq!(bp.poll(true, &dir), PollOutcome::Updated { writes: 1 });
        assert_eq!(
            dir.inner.get_property(&drive_path(2), OPERATIONAL_STATUS, "Functional"),
            Some(PropertyValue::Bool(false))
        );
        Ok(())
    }

    #[test]
    fn unpublished_change_is_retried_by_next_poll() -> Result<(), Box<dyn std::error::Error>> {
        let dir = RecordingDirectory::new();
        let bank = bank();
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank.clone());
        let mut bp = Backplane::bring_up(descriptor(), 1, &opener, &dir)?;

        bank.set_failed(0b1);
        dir.fail_sets(true);
        assert_eq!(bp.poll(true, &dir), PollOutcome::Updated { writes: 1 });

        // Registers unchanged, but the property is still stale.
        dir.fail_sets(false);
        assert_eq!(bp.poll(true, &dir), PollOutcome::Updated { writes: 1 });
        assert_eq!(
            dir.inner.get_property(&drive_path(1), OPERATIONAL_STATUS, "Functional"),
            Some(PropertyValue::Bool(false))
        );
        assert_eq!(bp.poll(true, &dir), PollOutcome::Unchanged);
        Ok(())
    }

    #[test]
    fn power_off_reads_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = RecordingDirectory::new();
        let bank = bank();
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank.clone());
        let mut bp = Backplane::bring_up(descriptor(), 1, &opener, &dir)?;
        bank.clear_log();

        assert_eq!(bp.poll(false, &dir), PollOutcome::Skipped);
        assert_eq!(bp.state(), BackplaneState::Suspended);
        assert!(bank.reads().is_empty());

        bank.set_presence(0);
        bank.set_ifdet(0);
        assert!(matches!(bp.poll(true, &dir), PollOutcome::Updated { .. }));
        assert_eq!(bp.state(), BackplaneState::Active);
        Ok(())
    }

    #[test]
    fn failed_register_read_keeps_previous_value() -> Result<(), Box<dyn std::error::Error>> {
        let dir = RecordingDirectory::new();
        let bank = bank();
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank.clone());
        let mut bp = Backplane::bring_up(descriptor(), 1, &opener, &dir)?;

        bank.fail_reads(REG_PRESENCE, true);
        bank.set_presence(0);
        assert_eq!(bp.poll(true, &dir), PollOutcome::Unchanged);
        assert_eq!(bp.snapshot().presence, 0b11);
        Ok(())
    }

    #[test]
    fn destroy_retracts_everything() -> Result<(), Box<dyn std::error::Error>> {
        let dir = RecordingDirectory::new();
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank());
        let mut bp = Backplane::bring_up(descriptor(), 1, &opener, &dir)?;
        bp.destroy(&dir);
        assert_eq!(bp.state(), BackplaneState::Destroyed);
        assert!(dir.inner.object_paths().is_empty());
        assert_eq!(bp.poll(true, &dir), PollOutcome::Skipped);
        assert!(bp.set_indicator(&dir, true, 0, true).is_err());
        Ok(())
    }
}
