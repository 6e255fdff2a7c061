//! `hsbp-manager` – hot-swap backplane daemon.
//!
//! 1. Loads `/etc/hsbp-manager/config.toml` (or `$HSBP_CONFIG`) and the
//!    platform description it points at.
//! 2. Wires the collaborators: `[[cpld]]` tables select simulated register
//!    banks, otherwise the real `/dev/i2c-*` nodes are used; `[[route]]`
//!    tables select static address resolution, otherwise sysfs is walked.
//! 3. Runs the manager until Ctrl-C.  `SIGHUP` re-reads the platform file
//!    and announces a configuration change, which triggers a debounced
//!    rediscovery.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use hsbp_hal::{
    AddressResolver, ChannelOpener, SharedPowerState, SimBank, SimChannelOpener,
    StaticAddressResolver, SysfsAddressResolver,
};
use hsbp_middleware::{
    EventBus, InMemoryDirectory, PlatformFile, StaticPlatform, Topic, TopicReceiver,
};
use hsbp_runtime::{Collaborators, Manager, ManagerSettings, init_tracing};
use hsbp_types::{Event, EventPayload, PropertyMap, interfaces};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::config::Config;

const CONFIG_SERVICE: &str = "xyz.openbmc_project.EntityManager";

fn main() -> ExitCode {
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };
    // Outlives the runtime so pending spans are flushed off its threads.
    let _tracer = init_tracing(&cfg.service_name);
    info!(config = %config::config_path().display(), ?cfg, "starting");

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "unable to start the async runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(serve(cfg))
}

fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn serve(cfg: Config) -> ExitCode {

    let file = match PlatformFile::load(&cfg.platform_file) {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "no usable platform file; starting with an empty platform");
            PlatformFile::default()
        }
    };

    let bus = EventBus::default();
    let power = SharedPowerState::new(cfg.assume_power_on);
    let platform = Arc::new(StaticPlatform::new(file.clone()));
    let deps = Collaborators {
        config: platform.clone(),
        inventory: platform.clone(),
        resolver: build_resolver(&file, &cfg),
        opener: build_opener(&file, &cfg),
        power: Arc::new(power.clone()),
        directory: Arc::new(InMemoryDirectory::new(cfg.service_name.clone(), bus.clone())),
    };
    let settings = ManagerSettings {
        service_name: cfg.service_name.clone(),
        poll_interval: cfg.poll_interval(),
        debounce: cfg.debounce(),
    };

    let (manager, handle) = Manager::new(settings, deps, bus.clone());
    let task = tokio::spawn(manager.run());
    tokio::spawn(track_power(bus.subscribe_to(Topic::Power), power));

    if let Err(e) = wait_for_shutdown(&cfg, &platform, &bus).await {
        error!(error = %e, "signal handling failed");
    }

    match handle.status().await {
        Ok(status) => info!(
            generation = status.generation,
            backplanes = status.backplanes.len(),
            ownerless = status.ownerless_drives,
            "shutting down"
        ),
        Err(e) => warn!(error = %e, "manager already stopped"),
    }
    let _ = handle.shutdown();
    if let Err(e) = task.await {
        error!(error = %e, "manager task panicked");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Block until Ctrl-C, reloading the platform file on every `SIGHUP`.
#[cfg(unix)]
async fn wait_for_shutdown(
    cfg: &Config,
    platform: &StaticPlatform,
    bus: &EventBus,
) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => return res,
            _ = hangup.recv() => reload(cfg, platform, bus),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _cfg: &Config,
    _platform: &StaticPlatform,
    _bus: &EventBus,
) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

fn reload(cfg: &Config, platform: &StaticPlatform, bus: &EventBus) {
    match PlatformFile::load(&cfg.platform_file) {
        Ok(file) => {
            platform.replace(file);
            info!(path = %cfg.platform_file.display(), "platform file reloaded");
            let event = configuration_changed(&cfg.platform_file.display().to_string());
            if let Err(e) = bus.publish_to(Topic::Configuration, event) {
                warn!(error = %e, "reload announced to nobody");
            }
        }
        Err(e) => warn!(error = %e, "platform reload failed; keeping the previous description"),
    }
}

fn configuration_changed(path: &str) -> Event {
    Event::new(
        CONFIG_SERVICE,
        EventPayload::PropertiesChanged {
            path: path.to_string(),
            interface: interfaces::BACKPLANE_CONFIG.to_string(),
            properties: PropertyMap::new(),
        },
    )
}

/// Mirror power notifications into the shared power state.
async fn track_power(mut rx: TopicReceiver, power: SharedPowerState) {
    loop {
        match rx.recv().await {
            Ok(Event {
                payload: EventPayload::PowerChanged { on },
                ..
            }) => {
                info!(on, "host power changed");
                power.set(on);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "power notifications lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}

fn build_opener(file: &PlatformFile, cfg: &Config) -> Arc<dyn ChannelOpener> {
    if !file.cplds.is_empty() {
        info!(banks = file.cplds.len(), "using simulated CPLD register banks");
        let opener = file.cplds.iter().fold(SimChannelOpener::new(), |opener, c| {
            let bank = SimBank::default();
            bank.set_presence(c.presence);
            bank.set_ifdet(c.ifdet);
            bank.set_failed(c.failed);
            bank.set_rebuild(c.rebuild);
            bank.set_versions(c.boot_version, c.fpga_version, c.security_rev);
            opener.with_bank(c.bus, c.address, bank)
        });
        return Arc::new(opener);
    }
    hardware_opener(cfg)
}

#[cfg(target_os = "linux")]
fn hardware_opener(cfg: &Config) -> Arc<dyn ChannelOpener> {
    Arc::new(hsbp_hal::I2cDevOpener::new(cfg.dev_root.clone()))
}

#[cfg(not(target_os = "linux"))]
fn hardware_opener(_cfg: &Config) -> Arc<dyn ChannelOpener> {
    struct NoHardware;
    impl ChannelOpener for NoHardware {
        fn open(
            &self,
            bus: u64,
            address: u8,
        ) -> Result<Box<dyn hsbp_hal::RegisterAccess>, hsbp_types::HsbpError> {
            Err(hsbp_types::HsbpError::HardwareIo {
                component: hsbp_hal::registers::channel_name(bus, address),
                details: "i2c-dev is only available on Linux".to_string(),
            })
        }
    }
    warn!("no i2c-dev on this platform; every backplane will fail to open");
    Arc::new(NoHardware)
}

fn build_resolver(file: &PlatformFile, cfg: &Config) -> Arc<dyn AddressResolver> {
    if file.routes.is_empty() {
        return Arc::new(SysfsAddressResolver::new(cfg.sysfs_root.clone()));
    }
    Arc::new(file.routes.iter().fold(StaticAddressResolver::new(), |r, route| {
        r.with_route(route.bus, route.mux_bus, route.mux_address, route.channel)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const BENCH: &str = r#"
[[cpld]]
bus = 4
address = 0x20
presence = 0x03
ifdet = 0x01
boot_version = 1

[[route]]
bus = 30
mux_bus = 4
mux_address = 0x70
channel = 2
"#;

    #[test]
    fn cpld_tables_select_simulated_banks() {
        let file = PlatformFile::from_toml_str(BENCH).unwrap();
        let opener = build_opener(&file, &Config::default());
        let mut channel = opener.open(4, 0x20).unwrap();
        channel.probe().unwrap();
        // Presence is active-low on the wire.
        assert_eq!(channel.read(hsbp_hal::registers::REG_PRESENCE).unwrap(), !0x03);
        assert!(opener.open(5, 0x20).is_err());
    }

    #[test]
    fn route_tables_select_static_resolution() {
        let file = PlatformFile::from_toml_str(BENCH).unwrap();
        let resolver = build_resolver(&file, &Config::default());
        let mux = resolver.resolve(30).unwrap();
        assert_eq!((mux.mux_bus, mux.mux_address, mux.channel), (4, 0x70, 2));
    }

    #[test]
    fn daemon_runtime_starts_from_plain_thread() {
        // Tracing is installed here, before any runtime exists.
        assert!(tokio::runtime::Handle::try_current().is_err());
        let runtime = build_runtime().unwrap();
        let joined = runtime.block_on(async { tokio::spawn(async { 7 }).await.unwrap() });
        assert_eq!(joined, 7);
    }

    #[tokio::test]
    async fn reload_replaces_platform_and_announces_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.toml");
        std::fs::write(&path, BENCH).unwrap();
        let cfg = Config {
            platform_file: path,
            ..Config::default()
        };
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Configuration);
        let platform = StaticPlatform::new(PlatformFile::default());

        reload(&cfg, &platform, &bus);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("configuration change published")
            .unwrap();
        assert_eq!(event.source, CONFIG_SERVICE);
        assert!(event.touches_interface(interfaces::BACKPLANE_CONFIG));
    }

    #[tokio::test]
    async fn failed_reload_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            platform_file: dir.path().join("missing.toml"),
            ..Config::default()
        };
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Configuration);
        reload(&cfg, &StaticPlatform::new(PlatformFile::default()), &bus);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn power_notifications_update_shared_state() {
        let bus = EventBus::default();
        let power = SharedPowerState::new(true);
        let task = tokio::spawn(track_power(bus.subscribe_to(Topic::Power), power.clone()));

        bus.publish_to(Topic::Power, Event::new("test", EventPayload::PowerChanged { on: false }))
            .unwrap();
        for _ in 0..100 {
            if !hsbp_hal::PowerOracle::power_on(&power) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!hsbp_hal::PowerOracle::power_on(&power));
        task.abort();
    }
}
