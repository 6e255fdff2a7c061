//! Linux `i2c-dev` register channel.
//!
//! Opens `/dev/i2c-<bus>`, forces the slave address (the CPLD may already be
//! claimed by a kernel driver) and issues SMBus byte transfers through the
//! `I2C_SMBUS` ioctl.
//!
//! | Operation | SMBus transaction |
//! |---|---|
//! | probe | receive byte |
//! | read | read byte data |
//! | write | write byte data |

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use hsbp_types::HsbpError;

use crate::registers::{ChannelOpener, RegisterAccess, channel_name};

pub const DEFAULT_DEV_ROOT: &str = "/dev";

// linux/i2c-dev.h, linux/i2c.h
const I2C_SLAVE_FORCE: libc::c_ulong = 0x0706;
const I2C_SMBUS: libc::c_ulong = 0x0720;
const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_READ: u8 = 1;
const I2C_SMBUS_BYTE: u32 = 1;
const I2C_SMBUS_BYTE_DATA: u32 = 2;
const I2C_SMBUS_BLOCK_MAX: usize = 32;

// Only `byte` is used; the other members size the buffer.
#[allow(dead_code)]
#[repr(C)]
union SmbusData {
    byte: u8,
    word: u16,
    block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
}

#[repr(C)]
struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

fn fault(id: &str, details: String) -> HsbpError {
    HsbpError::HardwareIo {
        component: id.to_string(),
        details,
    }
}

/// [`RegisterAccess`] over an `i2c-dev` character device.
pub struct I2cDevChannel {
    id: String,
    file: File,
}

impl I2cDevChannel {
    /// # Errors
    ///
    /// [`HsbpError::HardwareIo`] when the device node cannot be opened or the
    /// slave address cannot be selected.
    pub fn open(dev_root: &Path, bus: u64, address: u8) -> Result<Self, HsbpError> {
        let id = channel_name(bus, address);
        let node = dev_root.join(format!("i2c-{bus}"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&node)
            .map_err(|e| fault(&id, format!("unable to open {}: {e}", node.display())))?;

        // SAFETY: `file` is an open descriptor; I2C_SLAVE_FORCE takes the
        // address by value.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE_FORCE as _,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(fault(
                &id,
                format!("unable to select address: {}", io::Error::last_os_error()),
            ));
        }
        Ok(Self { id, file })
    }

    fn smbus(
        &self,
        read_write: u8,
        command: u8,
        size: u32,
        data: &mut SmbusData,
    ) -> io::Result<()> {
        let mut args = SmbusIoctlData {
            read_write,
            command,
            size,
            data,
        };
        // SAFETY: `args` and the buffer it points to outlive the call, and
        // the buffer is large enough for any SMBus transfer size.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                I2C_SMBUS as _,
                &mut args as *mut SmbusIoctlData,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl RegisterAccess for I2cDevChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn probe(&mut self) -> Result<(), HsbpError> {
        let mut data = SmbusData { byte: 0 };
        self.smbus(I2C_SMBUS_READ, 0, I2C_SMBUS_BYTE, &mut data)
            .map_err(|e| fault(&self.id, format!("no acknowledge: {e}")))
    }

    fn read(&mut self, register: u8) -> Result<u8, HsbpError> {
        let mut data = SmbusData { byte: 0 };
        self.smbus(I2C_SMBUS_READ, register, I2C_SMBUS_BYTE_DATA, &mut data)
            .map_err(|e| fault(&self.id, format!("read of register {register:#04x} failed: {e}")))?;
        // SAFETY: a byte-data read fills `byte`.
        Ok(unsafe { data.byte })
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), HsbpError> {
        let mut data = SmbusData { byte: value };
        self.smbus(I2C_SMBUS_WRITE, register, I2C_SMBUS_BYTE_DATA, &mut data)
            .map_err(|e| fault(&self.id, format!("write of register {register:#04x} failed: {e}")))
    }
}

/// [`ChannelOpener`] for `i2c-dev` nodes under a device root.
#[derive(Debug, Clone)]
pub struct I2cDevOpener {
    dev_root: PathBuf,
}

impl I2cDevOpener {
    pub fn new(dev_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
        }
    }
}

impl Default for I2cDevOpener {
    fn default() -> Self {
        Self::new(DEFAULT_DEV_ROOT)
    }
}

impl ChannelOpener for I2cDevOpener {
    fn open(&self, bus: u64, address: u8) -> Result<Box<dyn RegisterAccess>, HsbpError> {
        Ok(Box::new(I2cDevChannel::open(&self.dev_root, bus, address)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bus_is_hardware_error() {
        let dir = tempfile::tempdir().unwrap();
        let opener = I2cDevOpener::new(dir.path());
        match opener.open(4, 0x20) {
            Err(HsbpError::HardwareIo { component, details }) => {
                assert_eq!(component, "i2c-4@0x20");
                assert!(details.contains("i2c-4"));
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("opened a bus that does not exist"),
        }
    }

    #[test]
    fn regular_file_rejects_address_selection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("i2c-4"), b"").unwrap();
        assert!(matches!(
            I2cDevChannel::open(dir.path(), 4, 0x20),
            Err(HsbpError::HardwareIo { .. })
        ));
    }
}
