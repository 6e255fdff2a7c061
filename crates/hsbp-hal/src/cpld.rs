//! [`HsbpCpld`] – typed view over a backplane CPLD's register channel.
//!
//! Wraps a [`RegisterAccess`] driver and knows the register map: which
//! registers are active-low, how the revision bytes form a version string,
//! and where the per-slot indicators live.
//!
//! # Transient failures
//!
//! [`HsbpCpld::read_snapshot`] never fabricates a value.  A register whose
//! read fails keeps the value it had in the previous snapshot, so a flaky
//! transfer cannot flip a slot's state.

use hsbp_types::{HsbpError, SLOTS_PER_BACKPLANE};
use tracing::warn;

use crate::registers::{
    BlinkPattern, REG_BOOT_VERSION, REG_FAILED, REG_FPGA_VERSION, REG_IFDET, REG_LED_BASE,
    REG_PRESENCE, REG_REBUILD, REG_SECURITY_REV, REG_TYPE_ID, RegisterAccess,
};

/// Identity registers read once when the backplane is brought up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpldIdentity {
    pub type_id: u8,
    pub boot_version: u8,
    pub fpga_version: u8,
    pub security_rev: u8,
}

impl CpldIdentity {
    /// `"BB.FF.SS"`, each field zero-padded to two digits.
    pub fn version_string(&self) -> String {
        format!(
            "{:02}.{:02}.{:02}",
            self.boot_version, self.fpga_version, self.security_rev
        )
    }
}

/// The four status bitmaps, one bit per slot, already converted to
/// active-high.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub presence: u8,
    pub ifdet: u8,
    pub failed: u8,
    pub rebuilding: u8,
}

/// Register-level driver for one HSBP CPLD.
pub struct HsbpCpld {
    io: Box<dyn RegisterAccess>,
}

impl HsbpCpld {
    pub fn new(io: Box<dyn RegisterAccess>) -> Self {
        Self { io }
    }

    pub fn id(&self) -> &str {
        self.io.id()
    }

    /// # Errors
    ///
    /// Returns [`HsbpError::HardwareIo`] when the CPLD does not answer.
    pub fn probe(&mut self) -> Result<(), HsbpError> {
        self.io.probe()
    }

    /// Read the identity registers.  A failed read is logged and leaves that
    /// field at zero.
    pub fn read_identity(&mut self) -> CpldIdentity {
        CpldIdentity {
            type_id: self.read_or_zero(REG_TYPE_ID, "type id"),
            boot_version: self.read_or_zero(REG_BOOT_VERSION, "boot version"),
            fpga_version: self.read_or_zero(REG_FPGA_VERSION, "fpga version"),
            security_rev: self.read_or_zero(REG_SECURITY_REV, "security revision"),
        }
    }

    /// Presence bitmap, inverted from the active-low register.
    pub fn read_presence(&mut self) -> Result<u8, HsbpError> {
        self.io.read(REG_PRESENCE).map(|raw| !raw)
    }

    /// Interface-detect bitmap, inverted from the active-low register.
    pub fn read_ifdet(&mut self) -> Result<u8, HsbpError> {
        self.io.read(REG_IFDET).map(|raw| !raw)
    }

    pub fn read_failed(&mut self) -> Result<u8, HsbpError> {
        self.io.read(REG_FAILED)
    }

    pub fn read_rebuild(&mut self) -> Result<u8, HsbpError> {
        self.io.read(REG_REBUILD)
    }

    /// Read presence, ifdet, failed and rebuild, in that order.  Each
    /// register that fails keeps its value from `prev`.
    pub fn read_snapshot(&mut self, prev: RegisterSnapshot) -> RegisterSnapshot {
        let presence = self.read_presence();
        let ifdet = self.read_ifdet();
        let failed = self.read_failed();
        let rebuilding = self.read_rebuild();
        RegisterSnapshot {
            presence: self.retain("presence", presence, prev.presence),
            ifdet: self.retain("ifdet", ifdet, prev.ifdet),
            failed: self.retain("failed", failed, prev.failed),
            rebuilding: self.retain("rebuild", rebuilding, prev.rebuilding),
        }
    }

    /// Write a blink code to the indicator register of `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::Rejected`] for a slot outside the backplane and
    /// [`HsbpError::HardwareIo`] when the write fails.
    pub fn set_blink(&mut self, slot: usize, pattern: BlinkPattern) -> Result<(), HsbpError> {
        if slot >= SLOTS_PER_BACKPLANE {
            return Err(HsbpError::Rejected(format!("invalid drive slot {slot}")));
        }
        self.io.write(REG_LED_BASE + slot as u8, pattern as u8)
    }

    fn read_or_zero(&mut self, register: u8, what: &str) -> u8 {
        match self.io.read(register) {
            Ok(v) => v,
            Err(e) => {
                warn!(cpld = %self.io.id(), register, error = %e, "failed to read {what}");
                0
            }
        }
    }

    fn retain(&self, what: &str, read: Result<u8, HsbpError>, prev: u8) -> u8 {
        read.unwrap_or_else(|e| {
            warn!(cpld = %self.io.id(), error = %e, "failed to read {what} bitmap; keeping previous value");
            prev
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBank, SimCpld};

    fn cpld_with(bank: &SimBank) -> HsbpCpld {
        HsbpCpld::new(Box::new(SimCpld::new("test", bank.clone())))
    }

    #[test]
    fn version_string_is_zero_padded() {
        let id = CpldIdentity {
            type_id: 1,
            boot_version: 1,
            fpga_version: 12,
            security_rev: 3,
        };
        assert_eq!(id.version_string(), "01.12.03");
    }

    #[test]
    fn presence_and_ifdet_are_inverted() {
        let bank = SimBank::default();
        bank.set_register(REG_PRESENCE, 0b1111_1110);
        bank.set_register(REG_IFDET, 0b1111_1100);
        let mut cpld = cpld_with(&bank);
        assert_eq!(cpld.read_presence().unwrap(), 0b0000_0001);
        assert_eq!(cpld.read_ifdet().unwrap(), 0b0000_0011);
    }

    #[test]
    fn failed_register_read_keeps_previous_value() {
        let bank = SimBank::default();
        bank.set_presence(0b0000_0001);
        bank.set_failed(0b0000_0001);
        bank.fail_reads(REG_FAILED, true);
        let mut cpld = cpld_with(&bank);

        let prev = RegisterSnapshot {
            presence: 0,
            ifdet: 0,
            failed: 0b1000_0000,
            rebuilding: 0,
        };
        let snap = cpld.read_snapshot(prev);
        assert_eq!(snap.presence, 0b0000_0001);
        assert_eq!(snap.failed, 0b1000_0000, "failed read must keep the old mask");
    }

    #[test]
    fn snapshot_reads_registers_in_fixed_order() {
        let bank = SimBank::default();
        let mut cpld = cpld_with(&bank);
        cpld.read_snapshot(RegisterSnapshot::default());
        assert_eq!(
            bank.reads(),
            vec![REG_PRESENCE, REG_IFDET, REG_FAILED, REG_REBUILD]
        );
    }

    #[test]
    fn identity_read_failure_leaves_zero() {
        let bank = SimBank::default();
        bank.set_versions(2, 5, 1);
        bank.fail_reads(REG_FPGA_VERSION, true);
        let mut cpld = cpld_with(&bank);
        let id = cpld.read_identity();
        assert_eq!(id.version_string(), "02.00.01");
    }

    #[test]
    fn set_blink_targets_slot_register() {
        let bank = SimBank::default();
        let mut cpld = cpld_with(&bank);
        cpld.set_blink(3, BlinkPattern::Error).unwrap();
        assert_eq!(bank.writes(), vec![(REG_LED_BASE + 3, 0x2)]);
        assert!(matches!(
            cpld.set_blink(8, BlinkPattern::Off),
            Err(HsbpError::Rejected(_))
        ));
    }
}
