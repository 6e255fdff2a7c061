//! In-process simulated CPLD register banks for CI and bench testing.
//!
//! A [`SimBank`] is a cloneable handle onto a 256-byte register file.  Tests
//! keep one clone to flip bits and inject failures while the engine reads the
//! other through a [`SimCpld`] driver.  [`SimChannelOpener`] hands out those
//! drivers by `(bus, address)` just like a real bus would.
//!
//! # Example
//!
//! ```rust
//! use hsbp_hal::registers::{ChannelOpener, RegisterAccess};
//! use hsbp_hal::sim::{SimBank, SimChannelOpener};
//!
//! let bank = SimBank::default();
//! bank.set_presence(0b0000_0011);
//!
//! let opener = SimChannelOpener::new().with_bank(4, 0x20, bank.clone());
//! let mut channel = opener.open(4, 0x20).expect("simulated bank exists");
//! channel.probe().expect("simulated bank answers");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use hsbp_types::HsbpError;

use crate::registers::{
    ChannelOpener, REG_BOOT_VERSION, REG_FAILED, REG_FPGA_VERSION, REG_IFDET, REG_PRESENCE,
    REG_REBUILD, REG_SECURITY_REV, RegisterAccess, channel_name,
};

// ────────────────────────────────────────────────────────────────────────────
// Register bank
// ────────────────────────────────────────────────────────────────────────────

struct BankState {
    registers: [u8; 256],
    failing_reads: HashSet<u8>,
    fail_writes: bool,
    absent: bool,
    reads: Vec<u8>,
    writes: Vec<(u8, u8)>,
}

impl Default for BankState {
    fn default() -> Self {
        let mut registers = [0u8; 256];
        // Active-low bitmaps idle high: no drive present.
        registers[REG_PRESENCE as usize] = 0xff;
        registers[REG_IFDET as usize] = 0xff;
        Self {
            registers,
            failing_reads: HashSet::new(),
            fail_writes: false,
            absent: false,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }
}

/// Shared handle onto a simulated register file.
#[derive(Clone, Default)]
pub struct SimBank {
    state: Arc<Mutex<BankState>>,
}

impl SimBank {
    fn lock(&self) -> MutexGuard<'_, BankState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set a raw register value.
    pub fn set_register(&self, register: u8, value: u8) {
        self.lock().registers[register as usize] = value;
    }

    /// Raw register value.
    pub fn register(&self, register: u8) -> u8 {
        self.lock().registers[register as usize]
    }

    /// Set the logical presence mask (1 = PRSNTn asserted).  Stored inverted.
    pub fn set_presence(&self, mask: u8) {
        self.set_register(REG_PRESENCE, !mask);
    }

    /// Set the logical interface-detect mask.  Stored inverted.
    pub fn set_ifdet(&self, mask: u8) {
        self.set_register(REG_IFDET, !mask);
    }

    pub fn set_failed(&self, mask: u8) {
        self.set_register(REG_FAILED, mask);
    }

    pub fn set_rebuild(&self, mask: u8) {
        self.set_register(REG_REBUILD, mask);
    }

    pub fn set_versions(&self, boot: u8, fpga: u8, security: u8) {
        let mut state = self.lock();
        state.registers[REG_BOOT_VERSION as usize] = boot;
        state.registers[REG_FPGA_VERSION as usize] = fpga;
        state.registers[REG_SECURITY_REV as usize] = security;
    }

    /// Make reads of `register` fail (or succeed again).
    pub fn fail_reads(&self, register: u8, fail: bool) {
        let mut state = self.lock();
        if fail {
            state.failing_reads.insert(register);
        } else {
            state.failing_reads.remove(&register);
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make the device stop acknowledging its address.
    pub fn set_absent(&self, absent: bool) {
        self.lock().absent = absent;
    }

    /// Every register read so far, in order.
    pub fn reads(&self) -> Vec<u8> {
        self.lock().reads.clone()
    }

    /// Every successful register write so far, in order.
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.lock().writes.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.reads.clear();
        state.writes.clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Driver
// ────────────────────────────────────────────────────────────────────────────

/// [`RegisterAccess`] driver backed by a [`SimBank`].
pub struct SimCpld {
    id: String,
    bank: SimBank,
}

impl SimCpld {
    pub fn new(id: impl Into<String>, bank: SimBank) -> Self {
        Self {
            id: id.into(),
            bank,
        }
    }

    fn fault(&self, details: impl Into<String>) -> HsbpError {
        HsbpError::HardwareIo {
            component: self.id.clone(),
            details: details.into(),
        }
    }
}

impl RegisterAccess for SimCpld {
    fn id(&self) -> &str {
        &self.id
    }

    fn probe(&mut self) -> Result<(), HsbpError> {
        if self.bank.lock().absent {
            return Err(self.fault("no acknowledge"));
        }
        Ok(())
    }

    fn read(&mut self, register: u8) -> Result<u8, HsbpError> {
        let mut state = self.bank.lock();
        state.reads.push(register);
        if state.absent || state.failing_reads.contains(&register) {
            return Err(self.fault(format!("read of register {register:#04x} failed")));
        }
        Ok(state.registers[register as usize])
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), HsbpError> {
        let mut state = self.bank.lock();
        if state.absent || state.fail_writes {
            return Err(self.fault(format!("write of register {register:#04x} failed")));
        }
        state.registers[register as usize] = value;
        state.writes.push((register, value));
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Opener
// ────────────────────────────────────────────────────────────────────────────

/// [`ChannelOpener`] that serves registered [`SimBank`]s.  Opening an
/// unregistered `(bus, address)` fails like a missing `/dev/i2c-N` would.
#[derive(Default)]
pub struct SimChannelOpener {
    banks: HashMap<(u64, u8), SimBank>,
}

impl SimChannelOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bank(mut self, bus: u64, address: u8, bank: SimBank) -> Self {
        self.banks.insert((bus, address), bank);
        self
    }
}

impl ChannelOpener for SimChannelOpener {
    fn open(&self, bus: u64, address: u8) -> Result<Box<dyn RegisterAccess>, HsbpError> {
        let name = channel_name(bus, address);
        match self.banks.get(&(bus, address)) {
            Some(bank) => Ok(Box::new(SimCpld::new(name, bank.clone()))),
            None => Err(HsbpError::HardwareIo {
                component: name,
                details: format!("unable to open bus {bus}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bank_reports_no_drives() {
        let bank = SimBank::default();
        assert_eq!(bank.register(REG_PRESENCE), 0xff);
        assert_eq!(bank.register(REG_IFDET), 0xff);
    }

    #[test]
    fn opener_serves_registered_banks_only() {
        let bank = SimBank::default();
        let opener = SimChannelOpener::new().with_bank(4, 0x20, bank);
        assert!(opener.open(4, 0x20).is_ok());
        assert!(matches!(
            opener.open(5, 0x20),
            Err(HsbpError::HardwareIo { .. })
        ));
    }

    #[test]
    fn absent_device_fails_probe_and_reads() {
        let bank = SimBank::default();
        bank.set_absent(true);
        let mut cpld = SimCpld::new("sim", bank);
        assert!(cpld.probe().is_err());
        assert!(cpld.read(REG_FAILED).is_err());
    }

    #[test]
    fn write_failure_leaves_register_untouched() {
        let bank = SimBank::default();
        let mut cpld = SimCpld::new("sim", bank.clone());
        bank.fail_writes(true);
        assert!(cpld.write(0x10, 0x2).is_err());
        assert_eq!(bank.register(0x10), 0);
        assert!(bank.writes().is_empty());
    }
}
