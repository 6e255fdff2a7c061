//! Object publication.
//!
//! The engine publishes typed property objects (backplanes, drives,
//! indicators) through an [`ObjectDirectory`] and never cares how they reach
//! the outside world.  [`InMemoryDirectory`] keeps them in a map and announces
//! every mutation on the [`EventBus`] directory topic, tagged with the
//! publishing service's name.  The publisher never subscribes to that topic,
//! so its own churn cannot crowd out foreign inventory notifications.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hsbp_types::{Event, EventPayload, HsbpError, PropertyMap, PropertyValue};
use tracing::debug;

use crate::bus::{EventBus, Topic};

/// Publish / update / retract typed property objects.
pub trait ObjectDirectory: Send + Sync {
    /// Publish `interface` on `path` with its initial `properties`.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::Directory`] when the interface is already
    /// published at that path.
    fn add_interface(
        &self,
        path: &str,
        interface: &str,
        properties: PropertyMap,
    ) -> Result<(), HsbpError>;

    /// Update one property.  Returns `true` when the stored value changed.
    ///
    /// # Errors
    ///
    /// Returns [`HsbpError::Directory`] when the interface is not published.
    fn set_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<bool, HsbpError>;

    /// Retract an interface.  Returns `false` if it was not published.
    fn remove_interface(&self, path: &str, interface: &str) -> bool;
}

type Objects = BTreeMap<String, BTreeMap<String, PropertyMap>>;

/// In-process [`ObjectDirectory`] that mirrors every mutation onto the
/// event bus.
pub struct InMemoryDirectory {
    owner: String,
    bus: EventBus,
    objects: RwLock<Objects>,
}

impl InMemoryDirectory {
    /// `owner` is the sender name stamped on every notification.
    pub fn new(owner: impl Into<String>, bus: EventBus) -> Self {
        Self {
            owner: owner.into(),
            bus,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn get_property(&self, path: &str, interface: &str, name: &str) -> Option<PropertyValue> {
        self.read()
            .get(path)
            .and_then(|ifaces| ifaces.get(interface))
            .and_then(|props| props.get(name))
            .cloned()
    }

    pub fn has_interface(&self, path: &str, interface: &str) -> bool {
        self.read()
            .get(path)
            .is_some_and(|ifaces| ifaces.contains_key(interface))
    }

    /// Paths with at least one published interface.
    pub fn object_paths(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Objects> {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Objects> {
        self.objects.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn announce(&self, payload: EventPayload) {
        // Nobody listening is a normal condition.
        if let Err(e) = self
            .bus
            .publish_to(Topic::Directory, Event::new(self.owner.clone(), payload))
        {
            debug!(error = %e, "directory notification not delivered");
        }
    }
}

impl ObjectDirectory for InMemoryDirectory {
    fn add_interface(
        &self,
        path: &str,
        interface: &str,
        properties: PropertyMap,
    ) -> Result<(), HsbpError> {
        {
            let mut objects = self.write();
            let ifaces = objects.entry(path.to_string()).or_default();
            if ifaces.contains_key(interface) {
                return Err(HsbpError::Directory(format!(
                    "{interface} already published at {path}"
                )));
            }
            ifaces.insert(interface.to_string(), properties);
        }
        self.announce(EventPayload::InterfacesAdded {
            path: path.to_string(),
            interfaces: vec![interface.to_string()],
        });
        Ok(())
    }

    fn set_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<bool, HsbpError> {
        {
            let mut objects = self.write();
            let props = objects
                .get_mut(path)
                .and_then(|ifaces| ifaces.get_mut(interface))
                .ok_or_else(|| {
                    HsbpError::Directory(format!("{interface} is not published at {path}"))
                })?;
            if props.get(name) == Some(&value) {
                return Ok(false);
            }
            props.insert(name.to_string(), value.clone());
        }
        let mut changed = PropertyMap::new();
        changed.insert(name.to_string(), value);
        self.announce(EventPayload::PropertiesChanged {
            path: path.to_string(),
            interface: interface.to_string(),
            properties: changed,
        });
        Ok(true)
    }

    fn remove_interface(&self, path: &str, interface: &str) -> bool {
        let removed = {
            let mut objects = self.write();
            let Some(ifaces) = objects.get_mut(path) else {
                return false;
            };
            let removed = ifaces.remove(interface).is_some();
            if ifaces.is_empty() {
                objects.remove(path);
            }
            removed
        };
        if removed {
            self.announce(EventPayload::InterfacesRemoved {
                path: path.to_string(),
                interfaces: vec![interface.to_string()],
            });
        }
        removed
    }
}
