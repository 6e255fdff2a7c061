//! Byte-register access trait and the HSBP CPLD register map.
//!
//! The transport (i2c-dev, smbus, a simulator) is not this crate's concern;
//! drivers implement [`RegisterAccess`] and are handed out by a
//! [`ChannelOpener`].  Everything above this layer only ever talks to the
//! traits.

use hsbp_types::HsbpError;

/// CPLD type identifier.
pub const REG_TYPE_ID: u8 = 0x02;
/// Boot-loader revision.
pub const REG_BOOT_VERSION: u8 = 0x03;
/// FPGA firmware revision.
pub const REG_FPGA_VERSION: u8 = 0x04;
/// Security revision.
pub const REG_SECURITY_REV: u8 = 0x05;
/// Drive PRSNTn bitmap, active-low.  NVMe drives do not assert PRSNTn.
pub const REG_PRESENCE: u8 = 0x08;
/// Drive IFDETn bitmap, active-low.  Asserted by SATA, SAS and NVMe drives.
pub const REG_IFDET: u8 = 0x09;
/// Failed-drive bitmap.
pub const REG_FAILED: u8 = 0x0C;
/// Rebuilding-drive bitmap.
pub const REG_REBUILD: u8 = 0x0D;
/// First per-slot indicator register; slot `n` lives at `REG_LED_BASE + n`.
pub const REG_LED_BASE: u8 = 0x10;

/// Blink codes accepted by the per-slot indicator registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlinkPattern {
    Off = 0x0,
    Error = 0x2,
    Terminate = 0x3,
}

impl BlinkPattern {
    /// Map an indicator's requested `asserted` state to its blink code.
    pub fn for_asserted(asserted: bool) -> Self {
        if asserted {
            BlinkPattern::Error
        } else {
            BlinkPattern::Terminate
        }
    }
}

/// Synchronous byte-register channel to one device.
///
/// Implementations block the caller for the duration of the transfer.
pub trait RegisterAccess: Send {
    /// Stable identifier for diagnostics, e.g. `"i2c-4@0x20"`.
    fn id(&self) -> &str;

    /// Check that a device answers at the channel's address.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::HardwareIo`] if nothing acknowledges.
    fn probe(&mut self) -> Result<(), HsbpError>;

    /// Read one register.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::HardwareIo`] on a failed transfer.
    fn read(&mut self, register: u8) -> Result<u8, HsbpError>;

    /// Write one register.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::HardwareIo`] on a failed transfer.
    fn write(&mut self, register: u8, value: u8) -> Result<(), HsbpError>;
}

/// Opens register channels to `(bus, address)` pairs.
pub trait ChannelOpener: Send + Sync {
    /// # Errors
    ///
    /// Returns [`HsbpError::HardwareIo`] when the bus cannot be opened or the
    /// address cannot be selected.
    fn open(&self, bus: u64, address: u8) -> Result<Box<dyn RegisterAccess>, HsbpError>;
}

/// Diagnostic name for a `(bus, address)` pair.
pub fn channel_name(bus: u64, address: u8) -> String {
    format!("i2c-{bus}@{address:#04x}")
}
