//! Daemon configuration – reads `/etc/hsbp-manager/config.toml`.

use hsbp_hal::address::DEFAULT_SYSFS_ROOT;
use hsbp_types::SERVICE_NAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hsbp-manager/config.toml";

/// Persisted daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bus name the manager publishes under and ignores notifications from.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Seconds between register polls of each backplane.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Quiet period after the last configuration change before rediscovery.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Platform description: backplanes, muxes and drive inventory.
    #[serde(default = "default_platform_file")]
    pub platform_file: PathBuf,

    /// Root of the sysfs tree used to walk i2c mux channels.
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// Directory holding the `i2c-N` device nodes.
    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,

    /// Initial host power state until a power source reports otherwise.
    #[serde(default = "default_assume_power_on")]
    pub assume_power_on: bool,
}

fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_debounce_secs() -> u64 {
    2
}
fn default_platform_file() -> PathBuf {
    PathBuf::from("/etc/hsbp-manager/platform.toml")
}
fn default_sysfs_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_ROOT)
}
fn default_dev_root() -> PathBuf {
    PathBuf::from("/dev")
}
fn default_assume_power_on() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            poll_interval_secs: default_poll_interval_secs(),
            debounce_secs: default_debounce_secs(),
            platform_file: default_platform_file(),
            sysfs_root: default_sysfs_root(),
            dev_root: default_dev_root(),
            assume_power_on: default_assume_power_on(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin the poll timers.
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

/// `HSBP_CONFIG` if set, otherwise [`DEFAULT_CONFIG_PATH`].
pub fn config_path() -> PathBuf {
    std::env::var_os("HSBP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the config, falling back to defaults when the file is missing.
/// Environment overrides are applied either way.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `HSBP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HSBP_SERVICE_NAME` | `service_name` |
/// | `HSBP_POLL_INTERVAL_SECS` | `poll_interval_secs` |
/// | `HSBP_DEBOUNCE_SECS` | `debounce_secs` |
/// | `HSBP_PLATFORM_FILE` | `platform_file` |
/// | `HSBP_DEV_ROOT` | `dev_root` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HSBP_SERVICE_NAME") {
        cfg.service_name = v;
    }
    if let Ok(v) = std::env::var("HSBP_POLL_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.poll_interval_secs = secs;
    }
    if let Ok(v) = std::env::var("HSBP_DEBOUNCE_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.debounce_secs = secs;
    }
    if let Some(v) = std::env::var_os("HSBP_PLATFORM_FILE") {
        cfg.platform_file = PathBuf::from(v);
    }
    if let Some(v) = std::env::var_os("HSBP_DEV_ROOT") {
        cfg.dev_root = PathBuf::from(v);
    }
}
