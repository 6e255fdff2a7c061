//! Collaborator adapters.
//!
//! The engine never speaks directly to the platform's configuration or
//! inventory daemons.  It queries them through these traits; adapters
//! translate the queries into whatever the platform actually runs (a system
//! bus mapper, a static TOML description, a test script).
//!
//! # Overview
//!
//! - [`ConfigSource`] – enumerates configuration objects (backplane CPLDs,
//!   muxes) and fetches their properties.
//! - [`InventorySource`] – enumerates drive inventory objects reported by
//!   other services and fetches their property bags.
//! - [`StaticPlatform`][crate::platform::StaticPlatform] – implements both
//!   from a TOML platform file.

use async_trait::async_trait;
use hsbp_types::{HsbpError, ObjectEntry, PropertyMap};

/// Configuration discovery service.
///
/// # Contract
///
/// * `subtree` – every object under `root` (at most `depth` levels below it,
///   `0` meaning unlimited) that implements at least one of `interfaces`,
///   in the service's enumeration order.  That order is significant: mux
///   discovery indices are assigned from it.
///
/// * `properties` – all properties of `interface` on `entry`.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn subtree(
        &self,
        root: &str,
        depth: usize,
        interfaces: &[&str],
    ) -> Result<Vec<ObjectEntry>, HsbpError>;

    async fn properties(
        &self,
        entry: &ObjectEntry,
        interface: &str,
    ) -> Result<PropertyMap, HsbpError>;
}

/// Inventory event source.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Every NVMe drive inventory object currently published by any service.
    async fn drives(&self) -> Result<Vec<ObjectEntry>, HsbpError>;

    /// The full property bag of one inventory object (all interfaces).
    async fn properties(&self, entry: &ObjectEntry) -> Result<PropertyMap, HsbpError>;
}

/// `true` when `path` lies under `root` no more than `depth` levels down
/// (`depth == 0` means unlimited).  `root` itself never matches.
pub fn within_subtree(root: &str, path: &str, depth: usize) -> bool {
    let root = root.trim_end_matches('/');
    let Some(rest) = path.strip_prefix(root) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix('/') else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    depth == 0 || rest.split('/').count() <= depth
}
