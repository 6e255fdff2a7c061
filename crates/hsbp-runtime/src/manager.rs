//! [`Manager`] – the single task that owns every backplane.
//!
//! All state (backplanes, drive entities, the ownerless pool, poll timers)
//! is owned by one task.  Slow work (configuration lookups, mux fetches,
//! inventory collection) runs in spawned tasks that report back with a
//! [`Command`] stamped with the discovery generation that started them.
//! Results from an older generation are discarded on arrival.
//!
//! # Discovery pass
//!
//! ```text
//! start_discovery ─▶ list backplane configs ─▶ BackplanesListed
//!                                                │ replace backplanes, start timers
//!                                                ▼
//!                        one TopologyResolved per backplane (countdown latch)
//!                                                │ latch released
//!                                                ▼
//!                         collect inventory ─▶ InventoryCollected ─▶ correlate
//! ```
//!
//! A pass starts at startup, on [`ManagerHandle::rediscover`], and when the
//! debounce window expires after configuration or inventory notifications
//! from other services.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run(collaborators: hsbp_runtime::Collaborators, bus: hsbp_middleware::EventBus) {
//! use hsbp_runtime::{Manager, ManagerSettings};
//!
//! let (manager, handle) = Manager::new(ManagerSettings::default(), collaborators, bus);
//! let task = tokio::spawn(manager.run());
//! let status = handle.status().await;
//! handle.shutdown().ok();
//! task.await.ok();
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use hsbp_hal::{AddressResolver, ChannelOpener, PowerOracle};
use hsbp_kernel::correlator::is_candidate;
use hsbp_kernel::debounce::DEFAULT_DEBOUNCE;
use hsbp_kernel::{
    AssetCorrelator, Backplane, BackplaneState, CountdownLatch, Debouncer, InventoryReport,
    MuxSet, OwnerlessPool, TopologyResolver, is_rediscovery_trigger,
};
use hsbp_middleware::{
    ConfigSource, EventBus, InventorySource, ObjectDirectory, Topic, TopicReceiver,
};
use hsbp_types::interfaces::BACKPLANE_CONFIG;
use hsbp_types::{BackplaneDescriptor, Event, HsbpError, ObjectEntry, PropertyMap, SERVICE_NAME};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::poll_loop::{DEFAULT_POLL_INTERVAL, PollTimer};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Name stamped on our own notifications; inventory owned by this name
    /// is never correlated.
    pub service_name: String,
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// The services the manager talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub config: Arc<dyn ConfigSource>,
    pub inventory: Arc<dyn InventorySource>,
    pub resolver: Arc<dyn AddressResolver>,
    pub opener: Arc<dyn ChannelOpener>,
    pub power: Arc<dyn PowerOracle>,
    pub directory: Arc<dyn ObjectDirectory>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

type Listing = Result<Vec<(ObjectEntry, Result<PropertyMap, HsbpError>)>, HsbpError>;

/// Everything the manager task reacts to besides bus notifications.
pub enum Command {
    Rediscover,
    BackplanesListed {
        generation: u64,
        listing: Listing,
    },
    TopologyResolved {
        generation: u64,
        backplane: String,
        result: Result<MuxSet, HsbpError>,
    },
    InventoryCollected {
        generation: u64,
        result: Result<Vec<InventoryReport>, HsbpError>,
    },
    Poll {
        backplane: String,
        generation: u64,
    },
    SetIndicator {
        path: String,
        asserted: bool,
        reply: oneshot::Sender<Result<(), HsbpError>>,
    },
    Status {
        reply: oneshot::Sender<ManagerStatus>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackplaneStatus {
    pub name: String,
    pub index: u64,
    pub state: BackplaneState,
    pub version: String,
    pub drives: usize,
    pub muxes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStatus {
    pub generation: u64,
    pub correlation_passes: u64,
    pub backplanes: Vec<BackplaneStatus>,
    pub ownerless_drives: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable front door to a running [`Manager`].
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ManagerHandle {
    fn send(&self, command: Command) -> Result<(), HsbpError> {
        self.tx
            .send(command)
            .map_err(|_| HsbpError::Channel("manager is not running".into()))
    }

    /// Start a discovery pass now, bypassing the debounce window.
    ///
    /// # Errors
    ///
    /// [`HsbpError::Channel`] when the manager has stopped.
    pub fn rediscover(&self) -> Result<(), HsbpError> {
        self.send(Command::Rediscover)
    }

    /// Write the `Asserted` property of the indicator on the drive published
    /// at `path`.
    ///
    /// # Errors
    ///
    /// * [`HsbpError::Rejected`] – no backplane drive at `path`, or host
    ///   power is off.
    /// * [`HsbpError::HardwareIo`] – the LED register write failed.
    /// * [`HsbpError::Channel`] – the manager has stopped.
    pub async fn set_indicator(&self, path: &str, asserted: bool) -> Result<(), HsbpError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetIndicator {
            path: path.to_string(),
            asserted,
            reply,
        })?;
        rx.await
            .map_err(|_| HsbpError::Channel("indicator request dropped".into()))?
    }

    /// # Errors
    ///
    /// [`HsbpError::Channel`] when the manager has stopped.
    pub async fn status(&self) -> Result<ManagerStatus, HsbpError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await
            .map_err(|_| HsbpError::Channel("status request dropped".into()))
    }

    /// Ask the manager to retract everything and stop.
    ///
    /// # Errors
    ///
    /// [`HsbpError::Channel`] when the manager has already stopped.
    pub fn shutdown(&self) -> Result<(), HsbpError> {
        self.send(Command::Shutdown)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

pub struct Manager {
    settings: ManagerSettings,
    deps: Collaborators,
    // Keeps the notification topics open for as long as we listen on them.
    _bus: EventBus,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    config_events: TopicReceiver,
    inventory_events: TopicReceiver,
    debouncer: Debouncer,
    generation: u64,
    backplanes: BTreeMap<String, Backplane>,
    timers: HashMap<String, PollTimer>,
    ownerless: OwnerlessPool,
    topology_latch: Option<CountdownLatch>,
    correlation_passes: u64,
}

impl Manager {
    /// Subscribes to the configuration and inventory topics immediately, so
    /// notifications published after this call are never missed.
    pub fn new(
        settings: ManagerSettings,
        deps: Collaborators,
        bus: EventBus,
    ) -> (Self, ManagerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ManagerHandle { tx: tx.clone() };
        let manager = Self {
            debouncer: Debouncer::new(settings.debounce),
            settings,
            deps,
            config_events: bus.subscribe_to(Topic::Configuration),
            inventory_events: bus.subscribe_to(Topic::Inventory),
            _bus: bus,
            tx,
            rx,
            generation: 0,
            backplanes: BTreeMap::new(),
            timers: HashMap::new(),
            ownerless: OwnerlessPool::default(),
            topology_latch: None,
            correlation_passes: 0,
        };
        (manager, handle)
    }

    /// Run until [`ManagerHandle::shutdown`].  Everything published is
    /// retracted on the way out.
    pub async fn run(mut self) {
        info!(service = %self.settings.service_name, "hsbp manager started");
        self.start_discovery();

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                event = self.config_events.recv() => self.on_notification(event),
                event = self.inventory_events.recv() => self.on_notification(event),
                _ = self.debouncer.fired(), if self.debouncer.is_armed() => {
                    info!("change notifications settled; rediscovering");
                    self.start_discovery();
                }
            }
        }

        self.teardown();
        info!("hsbp manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Rediscover => self.start_discovery(),
            Command::BackplanesListed {
                generation,
                listing,
            } => self.on_backplanes_listed(generation, listing),
            Command::TopologyResolved {
                generation,
                backplane,
                result,
            } => self.on_topology_resolved(generation, backplane, result),
            Command::InventoryCollected { generation, result } => {
                self.on_inventory_collected(generation, result)
            }
            Command::Poll {
                backplane,
                generation,
            } => self.on_poll(&backplane, generation),
            Command::SetIndicator {
                path,
                asserted,
                reply,
            } => {
                let result = self.set_indicator(&path, asserted);
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {}
        }
    }

    fn on_notification(&mut self, received: Result<Event, RecvError>) {
        match received {
            Ok(event) => {
                if is_rediscovery_trigger(&event, &self.settings.service_name) {
                    debug!(source = %event.source, "change notification; rediscovery rescheduled");
                    self.debouncer.notify();
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "change notifications lost; scheduling rediscovery");
                self.debouncer.notify();
            }
            Err(RecvError::Closed) => {}
        }
    }

    // ── Discovery ────────────────────────────────────────────────────────────

    fn start_discovery(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        debug!(generation, "discovery pass started");

        let config = Arc::clone(&self.deps.config);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let listing = list_backplanes(config).await;
            let _ = tx.send(Command::BackplanesListed {
                generation,
                listing,
            });
        });
    }

    fn on_backplanes_listed(&mut self, generation: u64, listing: Listing) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "stale backplane listing discarded");
            return;
        }
        let entries = match listing {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "error contacting configuration service; keeping current backplanes");
                return;
            }
        };

        self.teardown();
        let directory = Arc::clone(&self.deps.directory);
        let mut indices = HashSet::new();
        for (entry, props) in entries {
            let descriptor =
                match props.and_then(|p| BackplaneDescriptor::from_properties(&entry.path, &p)) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "skipping backplane");
                        continue;
                    }
                };
            if !indices.insert(descriptor.index) || self.backplanes.contains_key(&descriptor.name)
            {
                let e = HsbpError::Configuration {
                    path: entry.path.clone(),
                    details: format!(
                        "backplane {} (index {}) duplicates an earlier entry",
                        descriptor.name, descriptor.index
                    ),
                };
                warn!(error = %e, "skipping backplane");
                continue;
            }

            let name = descriptor.name.clone();
            match Backplane::bring_up(
                descriptor,
                generation,
                self.deps.opener.as_ref(),
                directory.as_ref(),
            ) {
                Ok(bp) => {
                    let timer = PollTimer::spawn(
                        name.clone(),
                        generation,
                        self.settings.poll_interval,
                        self.tx.clone(),
                    );
                    self.timers.insert(name.clone(), timer);
                    self.backplanes.insert(name, bp);
                }
                Err(e) => warn!(backplane = %name, error = %e, "backplane not present"),
            }
        }
        info!(generation, count = self.backplanes.len(), "backplanes discovered");

        self.resolve_topology();
    }

    fn resolve_topology(&mut self) {
        if self.backplanes.is_empty() {
            self.start_correlation();
            return;
        }
        self.topology_latch = Some(CountdownLatch::new(self.backplanes.len()));

        let generation = self.generation;
        let resolver = TopologyResolver::new(Arc::clone(&self.deps.config));
        for bp in self.backplanes.values() {
            let resolver = resolver.clone();
            let tx = self.tx.clone();
            let backplane = bp.name().to_string();
            let path = bp.descriptor().path.clone();
            tokio::spawn(async move {
                let result = resolver.resolve(&path).await;
                let _ = tx.send(Command::TopologyResolved {
                    generation,
                    backplane,
                    result,
                });
            });
        }
    }

    fn on_topology_resolved(
        &mut self,
        generation: u64,
        backplane: String,
        result: Result<MuxSet, HsbpError>,
    ) {
        if generation != self.generation {
            debug!(generation, %backplane, "stale mux topology discarded");
            return;
        }
        match result {
            Ok(muxes) => match self.backplanes.get_mut(&backplane) {
                Some(bp) => bp.set_muxes(muxes),
                None => debug!(%backplane, "mux topology for unknown backplane"),
            },
            Err(e) => warn!(%backplane, error = %e, "error resolving mux topology"),
        }

        let released = self
            .topology_latch
            .as_ref()
            .is_some_and(CountdownLatch::count_down);
        if released {
            self.topology_latch = None;
            self.start_correlation();
        }
    }

    fn start_correlation(&mut self) {
        let generation = self.generation;
        let inventory = Arc::clone(&self.deps.inventory);
        let own_name = self.settings.service_name.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = collect_inventory(inventory, &own_name).await;
            let _ = tx.send(Command::InventoryCollected { generation, result });
        });
    }

    fn on_inventory_collected(
        &mut self,
        generation: u64,
        result: Result<Vec<InventoryReport>, HsbpError>,
    ) {
        if generation != self.generation {
            debug!(generation, "stale inventory discarded");
            return;
        }
        let reports = match result {
            Ok(reports) => reports,
            Err(e) => {
                error!(error = %e, "error contacting inventory service");
                return;
            }
        };
        let correlator =
            AssetCorrelator::new(self.deps.resolver.as_ref(), self.deps.directory.as_ref());
        correlator.run(&mut self.backplanes, &mut self.ownerless, reports);
        self.correlation_passes += 1;
    }

    // ── Steady state ─────────────────────────────────────────────────────────

    fn on_poll(&mut self, backplane: &str, generation: u64) {
        let power_on = self.deps.power.power_on();
        match self.backplanes.get_mut(backplane) {
            Some(bp) if bp.generation() == generation => {
                bp.poll(power_on, self.deps.directory.as_ref());
            }
            _ => debug!(backplane, generation, "stale poll tick discarded"),
        }
    }

    fn set_indicator(&mut self, path: &str, asserted: bool) -> Result<(), HsbpError> {
        let power_on = self.deps.power.power_on();
        let Some((bp, slot)) = self
            .backplanes
            .values_mut()
            .find_map(|bp| bp.slot_of(path).map(|slot| (bp, slot)))
        else {
            return Err(HsbpError::Rejected(format!("no indicator at {path}")));
        };
        let result = bp.set_indicator(self.deps.directory.as_ref(), power_on, slot, asserted);
        if let Err(e) = &result {
            warn!(path, asserted, error = %e, "indicator write refused");
        }
        result
    }

    fn status(&self) -> ManagerStatus {
        ManagerStatus {
            generation: self.generation,
            correlation_passes: self.correlation_passes,
            backplanes: self
                .backplanes
                .values()
                .map(|bp| BackplaneStatus {
                    name: bp.name().to_string(),
                    index: bp.index(),
                    state: bp.state(),
                    version: bp.version(),
                    drives: bp.drive_count(),
                    muxes: bp.muxes().len(),
                })
                .collect(),
            ownerless_drives: self.ownerless.len(),
        }
    }

    /// Stop every timer and retract everything published.
    fn teardown(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        let directory = self.deps.directory.as_ref();
        for (_, mut bp) in std::mem::take(&mut self.backplanes) {
            bp.destroy(directory);
        }
        self.ownerless.clear(directory);
        self.topology_latch = None;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spawned lookups
// ─────────────────────────────────────────────────────────────────────────────

async fn list_backplanes(config: Arc<dyn ConfigSource>) -> Listing {
    let entries = config.subtree("/", 0, &[BACKPLANE_CONFIG]).await?;
    let props = join_all(
        entries
            .iter()
            .map(|entry| config.properties(entry, BACKPLANE_CONFIG)),
    )
    .await;
    Ok(entries.into_iter().zip(props).collect())
}

async fn collect_inventory(
    inventory: Arc<dyn InventorySource>,
    own_name: &str,
) -> Result<Vec<InventoryReport>, HsbpError> {
    let entries: Vec<ObjectEntry> = inventory
        .drives()
        .await?
        .into_iter()
        .filter(|entry| is_candidate(entry, own_name))
        .collect();
    let props = join_all(entries.iter().map(|entry| inventory.properties(entry))).await;
    Ok(entries
        .into_iter()
        .zip(props)
        .filter_map(|(entry, props)| match props {
            Ok(properties) => Some(InventoryReport { entry, properties }),
            Err(e) => {
                warn!(path = %entry.path, error = %e, "error getting drive properties");
                None
            }
        })
        .collect())
}
