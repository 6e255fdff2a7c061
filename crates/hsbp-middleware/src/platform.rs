//! [`StaticPlatform`] – a TOML platform description serving as both the
//! configuration discovery service and the inventory event source.
//!
//! Useful on benches, in CI, and on platforms whose topology is fixed at
//! build time.
//!
//! # File layout
//!
//! ```toml
//! [[backplane]]
//! path = "/xyz/openbmc_project/inventory/system/board/BP1/HSBP_1"
//! bus = 4
//! address = 0x20
//! index = 1
//! name = "Front Backplane"
//!
//! [[mux]]
//! path = "/xyz/openbmc_project/inventory/system/board/BP1/Mux_1"
//! type = "PCA9546Mux"
//! bus = 4
//! address = 0x70
//! channel_names = ["0", "1", "2", "3"]
//!
//! [[drive]]
//! path = "/xyz/openbmc_project/inventory/drive/nvme0"
//! bus = 18
//! serial_number = "PHLJ0001"
//!
//! [[cpld]]            # simulated register bank
//! bus = 4
//! address = 0x20
//! presence = 0x01
//!
//! [[route]]           # static address resolution
//! bus = 18
//! mux_bus = 4
//! mux_address = 0x70
//! channel = 0
//! ```
//!
//! Optional fields left out of `[[backplane]]` and `[[mux]]` entries are
//! simply not published, so a malformed entry reaches the engine and is
//! rejected there like any other bad configuration.

use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard};

use async_trait::async_trait;
use hsbp_types::{HsbpError, ObjectEntry, PropertyMap, PropertyValue, interfaces};
use serde::{Deserialize, Serialize};

use crate::adapter::{ConfigSource, InventorySource, within_subtree};

const CONFIG_OWNER: &str = "xyz.openbmc_project.EntityManager";
const MUX_INTERFACE_PREFIX: &str = "xyz.openbmc_project.Configuration.";

fn default_drive_owner() -> String {
    "xyz.openbmc_project.NVMeSensor".to_string()
}

fn default_true() -> bool {
    true
}

/// One `[[backplane]]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackplaneEntry {
    pub path: String,
    pub bus: Option<u64>,
    pub address: Option<u64>,
    pub index: Option<u64>,
    pub name: Option<String>,
}

/// One `[[mux]]` table.  `type` is the configuration type suffix, e.g.
/// `"PCA9546Mux"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MuxEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub bus: Option<u64>,
    pub address: Option<u64>,
    pub channel_names: Option<Vec<String>>,
}

/// One `[[drive]]` table: an NVMe inventory object reported by another
/// service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveEntry {
    pub path: String,
    #[serde(default = "default_drive_owner")]
    pub owner: String,
    pub bus: Option<u64>,
    /// Whether the object carries the asset decorator.
    #[serde(default = "default_true")]
    pub asset: bool,
    pub part_number: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

/// One `[[cpld]]` table: register contents of a simulated backplane CPLD.
/// Bitmaps are logical (1 = asserted); the simulator stores the active-low
/// ones inverted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpldEntry {
    pub bus: u64,
    pub address: u8,
    #[serde(default)]
    pub presence: u8,
    #[serde(default)]
    pub ifdet: u8,
    #[serde(default)]
    pub failed: u8,
    #[serde(default)]
    pub rebuild: u8,
    #[serde(default)]
    pub boot_version: u8,
    #[serde(default)]
    pub fpga_version: u8,
    #[serde(default)]
    pub security_rev: u8,
}

/// One `[[route]]` table: a static bus → mux channel mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub bus: u64,
    pub mux_bus: u64,
    pub mux_address: u8,
    pub channel: usize,
}

/// The whole platform file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformFile {
    #[serde(default, rename = "backplane")]
    pub backplanes: Vec<BackplaneEntry>,
    #[serde(default, rename = "mux")]
    pub muxes: Vec<MuxEntry>,
    #[serde(default, rename = "drive")]
    pub drives: Vec<DriveEntry>,
    #[serde(default, rename = "cpld")]
    pub cplds: Vec<CpldEntry>,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteEntry>,
}

impl PlatformFile {
    /// # Errors
    ///
    /// Returns [`HsbpError::Configuration`] when the text is not a valid
    /// platform description.
    pub fn from_toml_str(raw: &str) -> Result<Self, HsbpError> {
        toml::from_str(raw).map_err(|e| HsbpError::Configuration {
            path: "<platform>".to_string(),
            details: format!("failed to parse platform file: {e}"),
        })
    }

    /// # Errors
    ///
    /// Returns [`HsbpError::Configuration`] when the file cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, HsbpError> {
        let raw = fs::read_to_string(path).map_err(|e| HsbpError::Configuration {
            path: path.display().to_string(),
            details: format!("failed to read platform file: {e}"),
        })?;
        Self::from_toml_str(&raw)
    }
}

/// [`ConfigSource`] + [`InventorySource`] over a [`PlatformFile`].  The file
/// can be swapped at runtime with [`StaticPlatform::replace`].
pub struct StaticPlatform {
    file: RwLock<PlatformFile>,
}

impl StaticPlatform {
    pub fn new(file: PlatformFile) -> Self {
        Self {
            file: RwLock::new(file),
        }
    }

    pub fn replace(&self, file: PlatformFile) {
        *self.file.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = file;
    }

    fn read(&self) -> RwLockReadGuard<'_, PlatformFile> {
        self.file.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn config_entries(file: &PlatformFile) -> Vec<ObjectEntry> {
        let backplanes = file.backplanes.iter().map(|b| ObjectEntry {
            path: b.path.clone(),
            owner: CONFIG_OWNER.to_string(),
            interfaces: vec![interfaces::BACKPLANE_CONFIG.to_string()],
        });
        let muxes = file.muxes.iter().map(|m| ObjectEntry {
            path: m.path.clone(),
            owner: CONFIG_OWNER.to_string(),
            interfaces: vec![format!("{MUX_INTERFACE_PREFIX}{}", m.kind)],
        });
        backplanes.chain(muxes).collect()
    }
}

fn not_found(path: &str) -> HsbpError {
    HsbpError::Directory(format!("no such object {path}"))
}

fn insert_opt(props: &mut PropertyMap, key: &str, value: Option<PropertyValue>) {
    if let Some(v) = value {
        props.insert(key.to_string(), v);
    }
}

#[async_trait]
impl ConfigSource for StaticPlatform {
    async fn subtree(
        &self,
        root: &str,
        depth: usize,
        wanted: &[&str],
    ) -> Result<Vec<ObjectEntry>, HsbpError> {
        let file = self.read();
        Ok(Self::config_entries(&file)
            .into_iter()
            .filter(|e| within_subtree(root, &e.path, depth))
            .filter(|e| wanted.iter().any(|w| e.has_interface(w)))
            .collect())
    }

    async fn properties(
        &self,
        entry: &ObjectEntry,
        interface: &str,
    ) -> Result<PropertyMap, HsbpError> {
        let file = self.read();
        let mut props = PropertyMap::new();
        if interface == interfaces::BACKPLANE_CONFIG {
            let b = file
                .backplanes
                .iter()
                .find(|b| b.path == entry.path)
                .ok_or_else(|| not_found(&entry.path))?;
            insert_opt(&mut props, "Bus", b.bus.map(PropertyValue::from));
            insert_opt(&mut props, "Address", b.address.map(PropertyValue::from));
            insert_opt(&mut props, "Index", b.index.map(PropertyValue::from));
            insert_opt(&mut props, "Name", b.name.clone().map(PropertyValue::from));
            return Ok(props);
        }
        let m = file
            .muxes
            .iter()
            .find(|m| m.path == entry.path && interface == format!("{MUX_INTERFACE_PREFIX}{}", m.kind))
            .ok_or_else(|| not_found(&entry.path))?;
        insert_opt(&mut props, "Bus", m.bus.map(PropertyValue::from));
        insert_opt(&mut props, "Address", m.address.map(PropertyValue::from));
        insert_opt(
            &mut props,
            "ChannelNames",
            m.channel_names.clone().map(PropertyValue::from),
        );
        Ok(props)
    }
}

#[async_trait]
impl InventorySource for StaticPlatform {
    async fn drives(&self) -> Result<Vec<ObjectEntry>, HsbpError> {
        Ok(self
            .read()
            .drives
            .iter()
            .map(|d| {
                let mut ifaces = vec![interfaces::NVME_ITEM.to_string()];
                if d.asset {
                    ifaces.push(interfaces::ASSET.to_string());
                }
                ObjectEntry {
                    path: d.path.clone(),
                    owner: d.owner.clone(),
                    interfaces: ifaces,
                }
            })
            .collect())
    }

    async fn properties(&self, entry: &ObjectEntry) -> Result<PropertyMap, HsbpError> {
        let file = self.read();
        let d = file
            .drives
            .iter()
            .find(|d| d.path == entry.path)
            .ok_or_else(|| not_found(&entry.path))?;
        let mut props = PropertyMap::new();
        insert_opt(&mut props, "Bus", d.bus.map(PropertyValue::from));
        insert_opt(&mut props, "PartNumber", d.part_number.clone().map(PropertyValue::from));
        insert_opt(&mut props, "SerialNumber", d.serial_number.clone().map(PropertyValue::from));
        insert_opt(&mut props, "Manufacturer", d.manufacturer.clone().map(PropertyValue::from));
        insert_opt(&mut props, "Model", d.model.clone().map(PropertyValue::from));
        Ok(props)
    }
}
