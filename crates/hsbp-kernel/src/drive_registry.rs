//! Published drive and indicator entities.
//!
//! Every slot of an active backplane gets a drive entity and an indicator
//! entity.  Drives reported by other services that cannot be placed on a
//! backplane live in the [`OwnerlessPool`] instead.
//!
//! # Published interfaces
//!
//! | Entity | Interface | Properties |
//! |---|---|---|
//! | drive | `Inventory.Item` | `Present`, `PrettyName` |
//! | drive | `OperationalStatus` | `Functional` |
//! | drive | `State.Drive` | `Rebuilding` |
//! | drive | `Inventory.Item.Drive` | none |
//! | drive | `Decorator.Asset` | once correlated |
//! | indicator | `Led.Group` | `Asserted` |
//!
//! Updates only touch properties whose value changed.

use hsbp_hal::{BlinkPattern, HsbpCpld};
use hsbp_middleware::ObjectDirectory;
use hsbp_types::interfaces::{
    ASSET, DRIVE_ITEM, DRIVE_PATH_PREFIX, DRIVE_STATE, INVENTORY_ITEM, LED_GROUP,
    OPERATIONAL_STATUS,
};
use hsbp_types::{AssetRecord, HsbpError, PropertyMap, PropertyValue, SLOTS_PER_BACKPLANE};
use tracing::{debug, info, warn};

use crate::slot_state::{SlotState, global_slot_index};

fn one(name: &str, value: impl Into<PropertyValue>) -> PropertyMap {
    let mut props = PropertyMap::new();
    props.insert(name.to_string(), value.into());
    props
}

/// Object path of global drive `index`.
pub fn drive_path(index: usize) -> String {
    format!("{DRIVE_PATH_PREFIX}{index}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Drive
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct DriveEntity {
    index: usize,
    path: String,
    state: SlotState,
    asset: Option<AssetRecord>,
}

impl DriveEntity {
    /// Publish a drive entity for global drive `index`.
    ///
    /// # Errors
    ///
    /// Fails when any of the drive's interfaces is already published.
    /// Interfaces published before the failure are retracted.
    pub fn publish(
        directory: &dyn ObjectDirectory,
        index: usize,
        state: SlotState,
    ) -> Result<Self, HsbpError> {
        let path = drive_path(index);
        let mut item = one("Present", state.present);
        item.insert("PrettyName".into(), format!("Drive {index}").into());
        let interfaces = [
            (INVENTORY_ITEM, item),
            (OPERATIONAL_STATUS, one("Functional", state.functional())),
            (DRIVE_STATE, one("Rebuilding", state.rebuilding)),
            (DRIVE_ITEM, PropertyMap::new()),
        ];
        for (n, (iface, props)) in interfaces.into_iter().enumerate() {
            if let Err(e) = directory.add_interface(&path, iface, props) {
                for earlier in [INVENTORY_ITEM, OPERATIONAL_STATUS, DRIVE_STATE].iter().take(n) {
                    directory.remove_interface(&path, earlier);
                }
                return Err(e);
            }
        }
        Ok(Self {
            index,
            path,
            state,
            asset: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn asset(&self) -> Option<&AssetRecord> {
        self.asset.as_ref()
    }

    /// Bring the published properties in line with `state`.  Returns the
    /// number of property writes issued.
    ///
    /// The cached state only follows a property once its write succeeded, so
    /// a failed write is retried by the next call.
    pub fn apply(&mut self, directory: &dyn ObjectDirectory, state: SlotState) -> usize {
        let mut writes = 0;
        if self.state.present != state.present {
            writes += 1;
            if self.write(directory, INVENTORY_ITEM, "Present", state.present) {
                self.state.present = state.present;
            }
        }
        if self.state.failed != state.failed {
            writes += 1;
            if self.write(directory, OPERATIONAL_STATUS, "Functional", state.functional()) {
                self.state.failed = state.failed;
            }
        }
        if self.state.rebuilding != state.rebuilding {
            writes += 1;
            if self.write(directory, DRIVE_STATE, "Rebuilding", state.rebuilding) {
                self.state.rebuilding = state.rebuilding;
            }
        }
        // Not published.
        self.state.nvme = state.nvme;
        writes
    }

    fn write(&self, directory: &dyn ObjectDirectory, iface: &str, name: &str, value: bool) -> bool {
        match directory.set_property(&self.path, iface, name, value.into()) {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %self.path, property = name, error = %e, "failed to update drive");
                false
            }
        }
    }

    /// Publish asset metadata.  Returns `false` when the drive already
    /// carries an asset.
    ///
    /// # Errors
    ///
    /// Propagates the directory's failure to publish the interface.
    pub fn attach_asset(
        &mut self,
        directory: &dyn ObjectDirectory,
        record: AssetRecord,
    ) -> Result<bool, HsbpError> {
        if self.asset.is_some() {
            return Ok(false);
        }
        directory.add_interface(&self.path, ASSET, record.to_properties())?;
        self.asset = Some(record);
        Ok(true)
    }

    pub fn retract(&mut self, directory: &dyn ObjectDirectory) {
        for iface in [INVENTORY_ITEM, OPERATIONAL_STATUS, DRIVE_STATE, DRIVE_ITEM] {
            directory.remove_interface(&self.path, iface);
        }
        if self.asset.take().is_some() {
            directory.remove_interface(&self.path, ASSET);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Indicator
// ─────────────────────────────────────────────────────────────────────────────

/// The fault indicator of one slot, published on the drive's path.
#[derive(Debug)]
pub struct IndicatorEntity {
    slot: usize,
    path: String,
    asserted: bool,
}

impl IndicatorEntity {
    /// Turn the slot's LED off and publish the indicator as de-asserted.
    ///
    /// A failed LED write is logged; the indicator is published anyway.
    ///
    /// # Errors
    ///
    /// Propagates the directory's failure to publish the interface.
    pub fn publish(
        directory: &dyn ObjectDirectory,
        cpld: &mut HsbpCpld,
        path: &str,
        slot: usize,
    ) -> Result<Self, HsbpError> {
        if let Err(e) = cpld.set_blink(slot, BlinkPattern::Off) {
            warn!(cpld = %cpld.id(), slot, error = %e, "failed to clear indicator");
        }
        directory.add_interface(path, LED_GROUP, one("Asserted", false))?;
        Ok(Self {
            slot,
            path: path.to_string(),
            asserted: false,
        })
    }

    pub fn asserted(&self) -> bool {
        self.asserted
    }

    /// Handle an external write to `Asserted`.
    ///
    /// A request equal to the current value succeeds without touching the
    /// hardware.  Otherwise the matching blink code is written and, only if
    /// that succeeds, the published value follows.  When publishing fails
    /// the previous blink code is restored and nothing changes.
    ///
    /// # Errors
    ///
    /// * [`HsbpError::Rejected`] – host power is off.
    /// * [`HsbpError::HardwareIo`] – the register write failed.
    pub fn set(
        &mut self,
        directory: &dyn ObjectDirectory,
        cpld: &mut HsbpCpld,
        power_on: bool,
        asserted: bool,
    ) -> Result<(), HsbpError> {
        if asserted == self.asserted {
            return Ok(());
        }
        if !power_on {
            return Err(HsbpError::Rejected(format!(
                "cannot change indicator of {} while host power is off",
                self.path
            )));
        }
        cpld.set_blink(self.slot, BlinkPattern::for_asserted(asserted))?;
        if let Err(e) = directory.set_property(&self.path, LED_GROUP, "Asserted", asserted.into()) {
            if let Err(undo) = cpld.set_blink(self.slot, BlinkPattern::for_asserted(self.asserted)) {
                warn!(path = %self.path, error = %undo, "failed to restore indicator");
            }
            return Err(e);
        }
        self.asserted = asserted;
        info!(path = %self.path, asserted, "indicator updated");
        Ok(())
    }

    pub fn retract(&self, directory: &dyn ObjectDirectory) {
        directory.remove_interface(&self.path, LED_GROUP);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// The drive and indicator entities of one backplane.
#[derive(Debug)]
pub struct DriveRegistry {
    drives: Vec<DriveEntity>,
    indicators: Vec<IndicatorEntity>,
}

impl DriveRegistry {
    /// Publish a drive and an indicator for every slot.
    ///
    /// # Errors
    ///
    /// Fails if any entity cannot be published; everything published so far
    /// is retracted first.
    pub fn create(
        directory: &dyn ObjectDirectory,
        cpld: &mut HsbpCpld,
        backplane_index: u64,
        slots: &[SlotState; SLOTS_PER_BACKPLANE],
    ) -> Result<Self, HsbpError> {
        let mut registry = Self {
            drives: Vec::with_capacity(SLOTS_PER_BACKPLANE),
            indicators: Vec::with_capacity(SLOTS_PER_BACKPLANE),
        };
        for (slot, state) in slots.iter().enumerate() {
            if let Err(e) = registry.publish_slot(directory, cpld, backplane_index, slot, *state) {
                registry.retract(directory);
                return Err(e);
            }
        }
        Ok(registry)
    }

    fn publish_slot(
        &mut self,
        directory: &dyn ObjectDirectory,
        cpld: &mut HsbpCpld,
        backplane_index: u64,
        slot: usize,
        state: SlotState,
    ) -> Result<(), HsbpError> {
        let drive = DriveEntity::publish(directory, global_slot_index(backplane_index, slot), state)?;
        let path = drive.path().to_string();
        self.drives.push(drive);
        self.indicators
            .push(IndicatorEntity::publish(directory, cpld, &path, slot)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    pub fn drive(&self, slot: usize) -> Option<&DriveEntity> {
        self.drives.get(slot)
    }

    pub fn indicator(&self, slot: usize) -> Option<&IndicatorEntity> {
        self.indicators.get(slot)
    }

    /// Local slot of the drive published at `path`.
    pub fn slot_of(&self, path: &str) -> Option<usize> {
        self.drives.iter().position(|d| d.path() == path)
    }

    /// Apply new slot states; returns the number of property writes.
    pub fn apply(
        &mut self,
        directory: &dyn ObjectDirectory,
        slots: &[SlotState; SLOTS_PER_BACKPLANE],
    ) -> usize {
        self.drives
            .iter_mut()
            .zip(slots)
            .map(|(drive, state)| drive.apply(directory, *state))
            .sum()
    }

    /// # Errors
    ///
    /// [`HsbpError::Rejected`] for an unknown slot, otherwise whatever
    /// [`DriveEntity::attach_asset`] returns.
    pub fn attach_asset(
        &mut self,
        directory: &dyn ObjectDirectory,
        slot: usize,
        record: AssetRecord,
    ) -> Result<bool, HsbpError> {
        self.drives
            .get_mut(slot)
            .ok_or_else(|| HsbpError::Rejected(format!("invalid drive slot {slot}")))?
            .attach_asset(directory, record)
    }

    /// # Errors
    ///
    /// [`HsbpError::Rejected`] for an unknown slot, otherwise whatever
    /// [`IndicatorEntity::set`] returns.
    pub fn set_indicator(
        &mut self,
        directory: &dyn ObjectDirectory,
        cpld: &mut HsbpCpld,
        power_on: bool,
        slot: usize,
        asserted: bool,
    ) -> Result<(), HsbpError> {
        self.indicators
            .get_mut(slot)
            .ok_or_else(|| HsbpError::Rejected(format!("invalid drive slot {slot}")))?
            .set(directory, cpld, power_on, asserted)
    }

    pub fn retract(&mut self, directory: &dyn ObjectDirectory) {
        for indicator in self.indicators.drain(..) {
            indicator.retract(directory);
        }
        for mut drive in self.drives.drain(..) {
            drive.retract(directory);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ownerless pool
// ─────────────────────────────────────────────────────────────────────────────

/// Drives that could not be placed on any backplane.
#[derive(Debug, Default)]
pub struct OwnerlessPool {
    drives: Vec<DriveEntity>,
}

impl OwnerlessPool {
    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    pub fn drives(&self) -> impl Iterator<Item = &DriveEntity> {
        self.drives.iter()
    }

    /// Retract every ownerless drive.
    pub fn clear(&mut self, directory: &dyn ObjectDirectory) {
        if !self.drives.is_empty() {
            debug!(count = self.drives.len(), "clearing ownerless drives");
        }
        for mut drive in self.drives.drain(..) {
            drive.retract(directory);
        }
    }

    /// Publish a present, functional drive at global `index` carrying
    /// `record`.  No indicator is created.
    ///
    /// # Errors
    ///
    /// Fails when the drive path is already in use.
    pub fn adopt(
        &mut self,
        directory: &dyn ObjectDirectory,
        index: usize,
        record: AssetRecord,
    ) -> Result<&DriveEntity, HsbpError> {
        let state = SlotState {
            present: true,
            nvme: true,
            failed: false,
            rebuilding: false,
        };
        let mut drive = DriveEntity::publish(directory, index, state)?;
        if let Err(e) = drive.attach_asset(directory, record) {
            drive.retract(directory);
            return Err(e);
        }
        let at = self.drives.len();
        self.drives.push(drive);
        Ok(&self.drives[at])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::slot_state::derive_slots;
    use hsbp_hal::{HsbpCpld, RegisterSnapshot, SimBank, SimCpld};
    use hsbp_middleware::{EventBus, InMemoryDirectory};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Wraps an [`InMemoryDirectory`] and records every `set_property` call.
    pub(crate) struct RecordingDirectory {
        pub inner: InMemoryDirectory,
        pub sets: Mutex<Vec<(String, String, String)>>,
        failing_sets: AtomicBool,
    }

    impl RecordingDirectory {
        pub fn new() -> Self {
            Self {
                inner: InMemoryDirectory::new("test", EventBus::default()),
                sets: Mutex::new(Vec::new()),
                failing_sets: AtomicBool::new(false),
            }
        }

        /// Make `set_property` fail (or succeed again).  Attempts are still
        /// recorded.
        pub fn fail_sets(&self, fail: bool) {
            self.failing_sets.store(fail, Ordering::SeqCst);
        }

        pub fn set_count(&self) -> usize {
            self.sets.lock().unwrap().len()
        }

        pub fn take_sets(&self) -> Vec<(String, String, String)> {
            std::mem::take(&mut *self.sets.lock().unwrap())
        }
    }

    impl ObjectDirectory for RecordingDirectory {
        fn add_interface(
            &self,
            path: &str,
            interface: &str,
            properties: PropertyMap,
        ) -> Result<(), HsbpError> {
            self.inner.add_interface(path, interface, properties)
        }

        fn set_property(
            &self,
            path: &str,
            interface: &str,
            name: &str,
            value: PropertyValue,
        ) -> Result<bool, HsbpError> {
            self.sets
                .lock()
                .unwrap()
                .push((path.into(), interface.into(), name.into()));
            if self.failing_sets.load(Ordering::SeqCst) {
                return Err(HsbpError::Directory(format!("{interface} rejected at {path}")));
            }
            self.inner.set_property(path, interface, name, value)
        }

        fn remove_interface(&self, path: &str, interface: &str) -> bool {
            self.inner.remove_interface(path, interface)
        }
    }

    fn cpld(bank: &SimBank) -> HsbpCpld {
        HsbpCpld::new(Box::new(SimCpld::new("i2c-4@0x20", bank.clone())))
    }

    fn snapshot(presence: u8, failed: u8) -> RegisterSnapshot {
        RegisterSnapshot {
            presence,
            ifdet: presence,
            failed,
            rebuilding: 0,
        }
    }

    #[test]
    fn creation_publishes_every_slot_and_clears_leds() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let registry =
            DriveRegistry::create(&dir, &mut cpld, 2, &derive_slots(&snapshot(0b11, 0)))
                .unwrap();

        assert_eq!(registry.len(), 8);
        assert_eq!(registry.drive(0).unwrap().path(), "/xyz/openbmc_project/inventory/item/drive/Drive_9");
        assert_eq!(
            dir.inner.get_property(&drive_path(9), INVENTORY_ITEM, "PrettyName"),
            Some(PropertyValue::Str("Drive 9".into()))
        );
        assert_eq!(
            dir.inner.get_property(&drive_path(16), INVENTORY_ITEM, "Present"),
            Some(PropertyValue::Bool(false))
        );
        assert!(dir.inner.has_interface(&drive_path(9), DRIVE_ITEM));
        assert_eq!(
            dir.inner.get_property(&drive_path(10), LED_GROUP, "Asserted"),
            Some(PropertyValue::Bool(false))
        );
        let led_writes: Vec<_> = bank.writes();
        assert_eq!(led_writes.len(), 8);
        assert!(led_writes.iter().all(|&(_, v)| v == BlinkPattern::Off as u8));
    }

    #[test]
    fn single_failed_bit_yields_single_functional_write() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0xff, 0))).unwrap();

        assert_eq!(registry.apply(&dir, &derive_slots(&snapshot(0xff, 0))), 0);
        assert_eq!(dir.set_count(), 0);

        assert_eq!(registry.apply(&dir, &derive_slots(&snapshot(0xff, 0b1000))), 1);
        assert_eq!(
            dir.take_sets(),
            vec![(drive_path(4), OPERATIONAL_STATUS.to_string(), "Functional".to_string())]
        );
        assert_eq!(
            dir.inner.get_property(&drive_path(4), OPERATIONAL_STATUS, "Functional"),
            Some(PropertyValue::Bool(false))
        );
    }

    #[test]
    fn removal_updates_presence_and_functional() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0b1, 0))).unwrap();
        assert_eq!(registry.apply(&dir, &derive_slots(&snapshot(0, 0))), 2);
        assert!(!registry.drive(0).unwrap().state().present);
    }

    #[test]
    fn indicator_rules() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0xff, 0))).unwrap();
        bank.clear_log();

        // Same value: accepted, hardware untouched.
        registry.set_indicator(&dir, &mut cpld, true, 3, false).unwrap();
        assert!(bank.writes().is_empty());

        // Power off: rejected, nothing changes.
        assert!(matches!(
            registry.set_indicator(&dir, &mut cpld, false, 3, true),
            Err(HsbpError::Rejected(_))
        ));
        assert!(!registry.indicator(3).unwrap().asserted());

        // Assert writes the error blink code.
        registry.set_indicator(&dir, &mut cpld, true, 3, true).unwrap();
        assert_eq!(bank.writes(), vec![(0x13, BlinkPattern::Error as u8)]);
        assert_eq!(
            dir.inner.get_property(&drive_path(4), LED_GROUP, "Asserted"),
            Some(PropertyValue::Bool(true))
        );

        // De-assert writes terminate.
        bank.clear_log();
        registry.set_indicator(&dir, &mut cpld, true, 3, false).unwrap();
        assert_eq!(bank.writes(), vec![(0x13, BlinkPattern::Terminate as u8)]);
    }

    #[test]
    fn failed_led_write_leaves_value_unchanged() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0xff, 0))).unwrap();
        bank.fail_writes(true);
        assert!(matches!(
            registry.set_indicator(&dir, &mut cpld, true, 0, true),
            Err(HsbpError::HardwareIo { .. })
        ));
        assert!(!registry.indicator(0).unwrap().asserted());
        assert_eq!(
            dir.inner.get_property(&drive_path(1), LED_GROUP, "Asserted"),
            Some(PropertyValue::Bool(false))
        );
    }

    #[test]
    fn failed_publication_is_retried_on_next_apply() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0xff, 0))).unwrap();
        let failed = derive_slots(&snapshot(0xff, 0b10));

        dir.fail_sets(true);
        assert_eq!(registry.apply(&dir, &failed), 1);
        assert!(!registry.drive(1).unwrap().state().failed);

        dir.fail_sets(false);
        dir.take_sets();
        assert_eq!(registry.apply(&dir, &failed), 1);
        assert_eq!(
            dir.take_sets(),
            vec![(drive_path(2), OPERATIONAL_STATUS.to_string(), "Functional".to_string())]
        );
        assert!(registry.drive(1).unwrap().state().failed);
        assert_eq!(
            dir.inner.get_property(&drive_path(2), OPERATIONAL_STATUS, "Functional"),
            Some(PropertyValue::Bool(false))
        );
        assert_eq!(registry.apply(&dir, &failed), 0);
    }

    #[test]
    fn failed_indicator_publication_restores_led() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0xff, 0))).unwrap();
        bank.clear_log();

        dir.fail_sets(true);
        assert!(matches!(
            registry.set_indicator(&dir, &mut cpld, true, 2, true),
            Err(HsbpError::Directory(_))
        ));
        assert!(!registry.indicator(2).unwrap().asserted());
        assert_eq!(
            bank.writes(),
            vec![
                (0x12, BlinkPattern::Error as u8),
                (0x12, BlinkPattern::Terminate as u8)
            ]
        );
        assert_eq!(
            dir.inner.get_property(&drive_path(3), LED_GROUP, "Asserted"),
            Some(PropertyValue::Bool(false))
        );

        // Nothing stuck: the same request goes through once publishing works.
        dir.fail_sets(false);
        registry.set_indicator(&dir, &mut cpld, true, 2, true).unwrap();
        assert!(registry.indicator(2).unwrap().asserted());
    }

    #[test]
    fn asset_attaches_once() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0xff, 0))).unwrap();
        let record = AssetRecord {
            serial_number: Some("S1".into()),
            ..AssetRecord::default()
        };
        assert!(registry.attach_asset(&dir, 2, record.clone()).unwrap());
        assert!(!registry.attach_asset(&dir, 2, record).unwrap());
        assert_eq!(
            dir.inner.get_property(&drive_path(3), ASSET, "SerialNumber"),
            Some(PropertyValue::Str("S1".into()))
        );
    }

    #[test]
    fn retract_removes_everything() {
        let dir = RecordingDirectory::new();
        let bank = SimBank::default();
        let mut cpld = cpld(&bank);
        let mut registry =
            DriveRegistry::create(&dir, &mut cpld, 1, &derive_slots(&snapshot(0, 0))).unwrap();
        registry.attach_asset(&dir, 0, AssetRecord::default()).unwrap();
        registry.retract(&dir);
        assert!(registry.is_empty());
        assert!(dir.inner.object_paths().is_empty());
    }

    #[test]
    fn ownerless_pool_adopts_and_clears() {
        let dir = RecordingDirectory::new();
        let mut pool = OwnerlessPool::default();
        let record = AssetRecord {
            model: Some("M".into()),
            ..AssetRecord::default()
        };
        let drive = pool.adopt(&dir, 17, record).unwrap();
        assert_eq!(drive.index(), 17);
        assert!(drive.state().present);
        assert!(dir.inner.has_interface(&drive_path(17), ASSET));
        assert!(!dir.inner.has_interface(&drive_path(17), LED_GROUP));

        pool.clear(&dir);
        assert!(pool.is_empty());
        assert!(dir.inner.object_paths().is_empty());
    }

    #[test]
    fn colliding_ownerless_index_is_refused() {
        let dir = RecordingDirectory::new();
        let mut pool = OwnerlessPool::default();
        pool.adopt(&dir, 5, AssetRecord::default()).unwrap();
        assert!(pool.adopt(&dir, 5, AssetRecord::default()).is_err());
        assert_eq!(pool.len(), 1);
    }
}
