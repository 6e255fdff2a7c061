//! Address resolution: reporting bus → (mux bus, mux address, channel).
//!
//! Inventory reporters only know the logical bus a drive sits on.  The Linux
//! i2c-mux core exposes enough under `/sys/bus/i2c/devices` to walk back to
//! the physical mux:
//!
//! | File | Content |
//! |---|---|
//! | `i2c-<bus>/mux_device` | symlink whose file name is `<parent bus>-<hex addr>`, e.g. `7-0052` |
//! | `i2c-<bus>/name` | `i2c-<parent>-mux (chan_id <n>)` |
//!
//! [`SysfsAddressResolver`] reads those; [`StaticAddressResolver`] serves a
//! fixed table for benches and tests.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use hsbp_types::HsbpError;

/// Default sysfs location of i2c adapters.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/i2c/devices";

/// The physical mux channel a logical bus hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxChannel {
    pub mux_bus: u64,
    pub mux_address: u8,
    pub channel: usize,
}

/// Maps a reporting bus number to its mux channel.
pub trait AddressResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`HsbpError::Correlation`] when the bus is not behind a mux or
    /// the platform description cannot be parsed.
    fn resolve(&self, bus: u64) -> Result<MuxChannel, HsbpError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// sysfs
// ─────────────────────────────────────────────────────────────────────────────

/// [`AddressResolver`] reading the i2c-mux sysfs layout.
#[derive(Debug, Clone)]
pub struct SysfsAddressResolver {
    root: PathBuf,
}

impl SysfsAddressResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsAddressResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl AddressResolver for SysfsAddressResolver {
    fn resolve(&self, bus: u64) -> Result<MuxChannel, HsbpError> {
        let adapter = self.root.join(format!("i2c-{bus}"));
        let fail = |details: String| HsbpError::Correlation {
            path: adapter.display().to_string(),
            details,
        };

        let target = fs::read_link(adapter.join("mux_device"))
            .map_err(|e| fail(format!("mux does not exist: {e}")))?;
        let device = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| fail("mux path invalid".to_string()))?;
        let (mux_bus, mux_address) = parse_mux_device(device)
            .ok_or_else(|| fail(format!("mux path invalid: {device}")))?;

        let name = fs::read_to_string(adapter.join("name"))
            .map_err(|e| fail(format!("unable to read name file: {e}")))?;
        let channel = parse_channel_id(&name)
            .ok_or_else(|| fail(format!("illegal name file: {}", name.trim())))?;

        Ok(MuxChannel {
            mux_bus,
            mux_address,
            channel,
        })
    }
}

/// Parse `"7-0052"` into bus 7, address 0x52.
pub(crate) fn parse_mux_device(name: &str) -> Option<(u64, u8)> {
    let (bus, addr) = name.split_once('-')?;
    if addr.is_empty() {
        return None;
    }
    let bus = bus.parse::<u64>().ok()?;
    let addr = u8::from_str_radix(addr, 16).ok()?;
    Some((bus, addr))
}

/// Parse the channel out of `"i2c-4-mux (chan_id 1)"`.
pub(crate) fn parse_channel_id(name: &str) -> Option<usize> {
    const PREFIX: &str = "chan_id ";
    let start = name.find(PREFIX)? + PREFIX.len();
    let digits: String = name[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Static table
// ─────────────────────────────────────────────────────────────────────────────

/// [`AddressResolver`] serving a fixed bus → channel table.
#[derive(Debug, Clone, Default)]
pub struct StaticAddressResolver {
    routes: HashMap<u64, MuxChannel>,
}

impl StaticAddressResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, bus: u64, mux_bus: u64, mux_address: u8, channel: usize) -> Self {
        self.routes.insert(
            bus,
            MuxChannel {
                mux_bus,
                mux_address,
                channel,
            },
        );
        self
    }
}

impl AddressResolver for StaticAddressResolver {
    fn resolve(&self, bus: u64) -> Result<MuxChannel, HsbpError> {
        self.routes
            .get(&bus)
            .copied()
            .ok_or_else(|| HsbpError::Correlation {
                path: format!("i2c-{bus}"),
                details: "bus is not behind a known mux".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mux_device_names() {
        assert_eq!(parse_mux_device("7-0052"), Some((7, 0x52)));
        assert_eq!(parse_mux_device("12-0070"), Some((12, 0x70)));
        assert_eq!(parse_mux_device("7-"), None);
        assert_eq!(parse_mux_device("70052"), None);
        assert_eq!(parse_mux_device("x-0052"), None);
    }

    #[test]
    fn parses_channel_ids() {
        assert_eq!(parse_channel_id("i2c-4-mux (chan_id 1)\n"), Some(1));
        assert_eq!(parse_channel_id("i2c-4-mux (chan_id 12)"), Some(12));
        assert_eq!(parse_channel_id("i2c-4-mux"), None);
        assert_eq!(parse_channel_id("i2c-4-mux (chan_id )"), None);
    }

    #[test]
    fn static_resolver_reports_unknown_bus() {
        let resolver = StaticAddressResolver::new().with_route(18, 4, 0x70, 2);
        assert_eq!(
            resolver.resolve(18).unwrap(),
            MuxChannel {
                mux_bus: 4,
                mux_address: 0x70,
                channel: 2
            }
        );
        assert!(matches!(
            resolver.resolve(19),
            Err(HsbpError::Correlation { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn sysfs_resolver_walks_mux_device_and_name() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let adapter = dir.path().join("i2c-18");
        fs::create_dir_all(&adapter).unwrap();
        fs::create_dir_all(dir.path().join("4-0070")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("4-0070"), adapter.join("mux_device")).unwrap();
        fs::write(adapter.join("name"), "i2c-4-mux (chan_id 3)\n").unwrap();

        let resolver = SysfsAddressResolver::new(dir.path());
        let channel = resolver.resolve(18).unwrap();
        assert_eq!(channel.mux_bus, 4);
        assert_eq!(channel.mux_address, 0x70);
        assert_eq!(channel.channel, 3);
    }

    #[test]
    fn sysfs_resolver_fails_without_mux_device() {
        let dir = tempfile::tempdir().expect("tmp dir");
        fs::create_dir_all(dir.path().join("i2c-3")).unwrap();
        let resolver = SysfsAddressResolver::new(dir.path());
        assert!(matches!(
            resolver.resolve(3),
            Err(HsbpError::Correlation { .. })
        ));
    }
}
