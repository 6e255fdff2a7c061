use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Well-known name this service publishes under.  Notifications carrying
/// this name as their source originate from our own publications.
pub const SERVICE_NAME: &str = "xyz.openbmc_project.HsbpManager";

/// Drive slots per backplane (one register bit per slot).
pub const SLOTS_PER_BACKPLANE: usize = 8;

/// Interface and object-path names shared by the publisher and consumers.
pub mod interfaces {
    /// Configuration interface describing one HSBP CPLD.
    pub const BACKPLANE_CONFIG: &str = "xyz.openbmc_project.Configuration.Intel_HSBP_CPLD";

    /// Mux configuration interfaces the topology resolver understands.
    pub const SUPPORTED_MUXES: [&str; 4] = [
        "xyz.openbmc_project.Configuration.PCA9543Mux",
        "xyz.openbmc_project.Configuration.PCA9544Mux",
        "xyz.openbmc_project.Configuration.PCA9545Mux",
        "xyz.openbmc_project.Configuration.PCA9546Mux",
    ];

    pub const NVME_ITEM: &str = "xyz.openbmc_project.Inventory.Item.NVMe";
    pub const INVENTORY_ITEM: &str = "xyz.openbmc_project.Inventory.Item";
    pub const DRIVE_ITEM: &str = "xyz.openbmc_project.Inventory.Item.Drive";
    pub const ASSET: &str = "xyz.openbmc_project.Inventory.Decorator.Asset";
    pub const OPERATIONAL_STATUS: &str = "xyz.openbmc_project.State.Decorator.OperationalStatus";
    pub const DRIVE_STATE: &str = "xyz.openbmc_project.State.Drive";
    pub const LED_GROUP: &str = "xyz.openbmc_project.Led.Group";
    pub const VERSION: &str = "xyz.openbmc_project.Software.Version";

    pub const HSBP_VERSION_PURPOSE: &str =
        "xyz.openbmc_project.Software.Version.VersionPurpose.HSBP";

    pub const HSBP_PATH_PREFIX: &str = "/xyz/openbmc_project/inventory/item/hsbp/";
    pub const DRIVE_PATH_PREFIX: &str = "/xyz/openbmc_project/inventory/item/drive/Drive_";
}

// ─────────────────────────────────────────────────────────────────────────────
// Property values
// ─────────────────────────────────────────────────────────────────────────────

/// A single typed property value exchanged with the object directory and the
/// configuration / inventory sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    U64(u64),
    Str(String),
    StrList(Vec<String>),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::StrList(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::U64(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::StrList(v)
    }
}

/// Property name → value, ordered so that published objects are stable.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// One object returned by a subtree query: where it lives, who owns it and
/// which interfaces it implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub path: String,
    pub owner: String,
    pub interfaces: Vec<String>,
}

impl ObjectEntry {
    pub fn has_interface(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// The object path one level up, e.g. `/a/b/c` → `/a/b`.
    pub fn parent_path(&self) -> &str {
        parent_path(&self.path)
    }
}

/// Return the parent of an object path (`/` for top-level objects).
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Validated backplane configuration as delivered by configuration discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackplaneDescriptor {
    /// Object path of the configuration entry.
    pub path: String,
    pub bus: u64,
    pub address: u8,
    /// 1-based, globally unique backplane index.
    pub index: u64,
    pub name: String,
}

impl BackplaneDescriptor {
    /// Build a descriptor from the raw properties of a configuration object.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::Configuration`] when `Bus`, `Address`, `Index` or
    /// `Name` is missing or malformed, or the index is outside `1..=255`.
    pub fn from_properties(path: &str, props: &PropertyMap) -> Result<Self, HsbpError> {
        let bus = required_u64(path, props, "Bus")?;
        let address = parse_address(path, props)?;
        let index = required_u64(path, props, "Index")?;
        if !(1..=u64::from(u8::MAX)).contains(&index) {
            return Err(HsbpError::Configuration {
                path: path.to_string(),
                details: format!("backplane index {index} out of range"),
            });
        }
        let name = props
            .get("Name")
            .and_then(PropertyValue::as_str)
            .ok_or_else(|| missing(path, "Name"))?
            .to_string();
        Ok(Self {
            path: path.to_string(),
            bus,
            address,
            index,
            name,
        })
    }
}

/// Validated mux configuration.  Only the number of channel names matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxDescriptor {
    pub bus: u64,
    pub address: u8,
    pub channels: usize,
}

impl MuxDescriptor {
    /// # Errors
    ///
    /// Returns [`HsbpError::Configuration`] when `Bus`, `Address` or
    /// `ChannelNames` is missing or malformed.
    pub fn from_properties(path: &str, props: &PropertyMap) -> Result<Self, HsbpError> {
        let bus = required_u64(path, props, "Bus")?;
        let address = parse_address(path, props)?;
        let channels = props
            .get("ChannelNames")
            .and_then(PropertyValue::as_str_list)
            .ok_or_else(|| missing(path, "ChannelNames"))?
            .len();
        Ok(Self {
            bus,
            address,
            channels,
        })
    }
}

fn missing(path: &str, field: &str) -> HsbpError {
    HsbpError::Configuration {
        path: path.to_string(),
        details: format!("missing or malformed '{field}'"),
    }
}

fn required_u64(path: &str, props: &PropertyMap, field: &str) -> Result<u64, HsbpError> {
    props
        .get(field)
        .and_then(PropertyValue::as_u64)
        .ok_or_else(|| missing(path, field))
}

/// Accept the address either as an integer or as a decimal / `0x` hex string.
/// 7-bit I2C addresses only.
fn parse_address(path: &str, props: &PropertyMap) -> Result<u8, HsbpError> {
    let raw = match props.get("Address") {
        Some(PropertyValue::U64(v)) => *v,
        Some(PropertyValue::Str(s)) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse::<u64>(),
            };
            parsed.map_err(|_| HsbpError::Configuration {
                path: path.to_string(),
                details: format!("unparseable address '{s}'"),
            })?
        }
        _ => return Err(missing(path, "Address")),
    };
    if raw > 0x7f {
        return Err(HsbpError::Configuration {
            path: path.to_string(),
            details: format!("address {raw:#x} is not a 7-bit I2C address"),
        });
    }
    Ok(raw as u8)
}

/// Asset metadata attached to a drive.  Only the fields the reporter
/// supplied are published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub part_number: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

impl AssetRecord {
    /// Pick the asset fields out of an inventory property bag, ignoring
    /// everything else (and any non-string value).
    pub fn from_properties(props: &PropertyMap) -> Self {
        let field = |key: &str| props.get(key).and_then(PropertyValue::as_str).map(str::to_string);
        Self {
            part_number: field("PartNumber"),
            serial_number: field("SerialNumber"),
            manufacturer: field("Manufacturer"),
            model: field("Model"),
        }
    }

    pub fn to_properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        let fields = [
            ("PartNumber", &self.part_number),
            ("SerialNumber", &self.serial_number),
            ("Manufacturer", &self.manufacturer),
            ("Model", &self.model),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                props.insert(key.to_string(), PropertyValue::Str(v.clone()));
            }
        }
        props
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for change notifications on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Sender name, e.g. `"xyz.openbmc_project.EntityManager"`.
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// `true` when the notification concerns `interface`.
    pub fn touches_interface(&self, interface: &str) -> bool {
        match &self.payload {
            EventPayload::PropertiesChanged { interface: i, .. } => i == interface,
            EventPayload::InterfacesAdded { interfaces, .. }
            | EventPayload::InterfacesRemoved { interfaces, .. } => {
                interfaces.iter().any(|i| i == interface)
            }
            EventPayload::PowerChanged { .. } => false,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    PropertiesChanged {
        path: String,
        interface: String,
        properties: PropertyMap,
    },
    InterfacesAdded {
        path: String,
        interfaces: Vec<String>,
    },
    InterfacesRemoved {
        path: String,
        interfaces: Vec<String>,
    },
    PowerChanged {
        on: bool,
    },
}

/// Error type spanning hardware, configuration and correlation failures.
/// None of these is fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HsbpError {
    #[error("Hardware I/O error on {component}: {details}")]
    HardwareIo { component: String, details: String },

    #[error("Configuration error at {path}: {details}")]
    Configuration { path: String, details: String },

    #[error("Correlation error at {path}: {details}")]
    Correlation { path: String, details: String },

    #[error("Timer error: {0}")]
    Timer(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Directory lookup failed: {0}")]
    Directory(String),

    #[error("Channel error: {0}")]
    Channel(String),
}
