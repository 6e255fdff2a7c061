//! Asset correlation.
//!
//! Other services report drives they manage (NVMe drives seen over their
//! management bus) together with asset metadata.  The correlator maps each
//! report's bus to a mux channel, finds the backplane owning that mux and
//! attaches the asset to the matching drive.  Reports no backplane claims
//! become ownerless drives.
//!
//! # Placement
//!
//! ```text
//! report.Bus ──resolve──▶ (mux bus, mux address, channel)
//!                              │
//!            backplane whose MuxSet contains that mux
//!                              │
//!              slot = channel_offset + channel   (< 8, else dropped)
//! ```

use std::collections::BTreeMap;

use hsbp_hal::AddressResolver;
use hsbp_middleware::ObjectDirectory;
use hsbp_types::interfaces::ASSET;
use hsbp_types::{
    AssetRecord, HsbpError, ObjectEntry, PropertyMap, PropertyValue, SLOTS_PER_BACKPLANE,
};
use tracing::{debug, info, warn};

use crate::backplane::Backplane;
use crate::drive_registry::OwnerlessPool;

/// One drive as reported by another service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryReport {
    pub entry: ObjectEntry,
    pub properties: PropertyMap,
}

/// Where a report belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Slot { backplane: String, slot: usize },
    Ownerless,
}

/// Counters for one correlation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationSummary {
    pub attached: usize,
    pub already_attached: usize,
    pub ownerless: usize,
    pub dropped: usize,
}

/// `true` for inventory objects worth correlating: published by someone
/// other than `own_name` and carrying asset metadata.
pub fn is_candidate(entry: &ObjectEntry, own_name: &str) -> bool {
    entry.owner != own_name && entry.has_interface(ASSET)
}

/// Decide where `report` belongs.
///
/// # Errors
///
/// Returns [`HsbpError::Correlation`] when the report has no `Bus`, the bus
/// cannot be resolved to a mux channel, or the channel maps past the last
/// slot of its backplane.
pub fn locate(
    report: &InventoryReport,
    resolver: &dyn AddressResolver,
    backplanes: &BTreeMap<String, Backplane>,
) -> Result<Placement, HsbpError> {
    let path = &report.entry.path;
    let bus = report
        .properties
        .get("Bus")
        .and_then(PropertyValue::as_u64)
        .ok_or_else(|| HsbpError::Correlation {
            path: path.clone(),
            details: "no Bus property".into(),
        })?;
    let channel = resolver.resolve(bus)?;

    for bp in backplanes.values() {
        let Some(offset) = bp.muxes().channel_offset(channel.mux_bus, channel.mux_address) else {
            continue;
        };
        let slot = offset + channel.channel;
        if slot >= SLOTS_PER_BACKPLANE {
            return Err(HsbpError::Correlation {
                path: path.clone(),
                details: format!("illegal drive slot {slot} on {}", bp.name()),
            });
        }
        return Ok(Placement::Slot {
            backplane: bp.name().to_string(),
            slot,
        });
    }
    Ok(Placement::Ownerless)
}

/// Runs correlation passes against the live backplane set.
pub struct AssetCorrelator<'a> {
    resolver: &'a dyn AddressResolver,
    directory: &'a dyn ObjectDirectory,
}

impl<'a> AssetCorrelator<'a> {
    pub fn new(resolver: &'a dyn AddressResolver, directory: &'a dyn ObjectDirectory) -> Self {
        Self {
            resolver,
            directory,
        }
    }

    /// Clear the ownerless pool, then place every report.  A report that
    /// cannot be placed is logged and skipped; the pass always completes.
    pub fn run(
        &self,
        backplanes: &mut BTreeMap<String, Backplane>,
        ownerless: &mut OwnerlessPool,
        reports: Vec<InventoryReport>,
    ) -> CorrelationSummary {
        ownerless.clear(self.directory);
        let mut summary = CorrelationSummary::default();

        for report in reports {
            let record = AssetRecord::from_properties(&report.properties);
            let placement = match locate(&report, self.resolver, backplanes) {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %report.entry.path, error = %e, "dropping drive report");
                    summary.dropped += 1;
                    continue;
                }
            };

            match placement {
                Placement::Slot { backplane, slot } => {
                    let Some(bp) = backplanes.get_mut(&backplane) else {
                        summary.dropped += 1;
                        continue;
                    };
                    match bp.attach_asset(self.directory, slot, record) {
                        Ok(true) => {
                            debug!(path = %report.entry.path, %backplane, slot, "asset attached");
                            summary.attached += 1;
                        }
                        Ok(false) => summary.already_attached += 1,
                        Err(e) => {
                            warn!(path = %report.entry.path, error = %e, "failed to attach asset");
                            summary.dropped += 1;
                        }
                    }
                }
                Placement::Ownerless => {
                    let total: usize = backplanes.values().map(Backplane::drive_count).sum();
                    let index = total + ownerless.len() + 1;
                    match ownerless.adopt(self.directory, index, record) {
                        Ok(_) => {
                            debug!(path = %report.entry.path, index, "drive has no backplane");
                            summary.ownerless += 1;
                        }
                        Err(e) => {
                            warn!(path = %report.entry.path, index, error = %e, "failed to publish ownerless drive");
                            summary.dropped += 1;
                        }
                    }
                }
            }
        }

        info!(
            attached = summary.attached,
            ownerless = summary.ownerless,
            dropped = summary.dropped,
            "correlation pass complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_registry::drive_path;
    use crate::drive_registry::tests::RecordingDirectory;
    use crate::topology::{Mux, MuxSet};
    use hsbp_hal::{SimBank, SimChannelOpener, StaticAddressResolver};
    use hsbp_types::BackplaneDescriptor;
    use hsbp_types::interfaces::NVME_ITEM;

    fn backplane(
        dir: &RecordingDirectory,
        index: u64,
        muxes: &[(u64, usize)],
    ) -> Backplane {
        let bus = 10 + index;
        let opener = SimChannelOpener::new().with_bank(bus, 0x20, SimBank::default());
        let desc = BackplaneDescriptor {
            path: format!("/board{index}/hsbp"),
            bus,
            address: 0x20,
            index,
            name: format!("HSBP {index}"),
        };
        let mut bp = Backplane::bring_up(desc, 1, &opener, dir).unwrap();
        let mut set = MuxSet::default();
        for (i, &(mux_bus, channels)) in muxes.iter().enumerate() {
            set.insert(Mux {
                bus: mux_bus,
                address: 0x70,
                channels,
                index: i,
            });
        }
        bp.set_muxes(set);
        bp
    }

    fn report(name: &str, bus: Option<u64>, serial: &str) -> InventoryReport {
        let mut properties = PropertyMap::new();
        if let Some(bus) = bus {
            properties.insert("Bus".into(), bus.into());
        }
        properties.insert("SerialNumber".into(), serial.into());
        InventoryReport {
            entry: ObjectEntry {
                path: format!("/inventory/{name}"),
                owner: "xyz.openbmc_project.NVMeSensor".into(),
                interfaces: vec![NVME_ITEM.into(), ASSET.into()],
            },
            properties,
        }
    }

    fn setup(dir: &RecordingDirectory) -> BTreeMap<String, Backplane> {
        let mut map = BTreeMap::new();
        let a = backplane(dir, 1, &[(5, 4), (6, 2)]);
        let b = backplane(dir, 2, &[(7, 8)]);
        map.insert(a.name().to_string(), a);
        map.insert(b.name().to_string(), b);
        map
    }

    fn resolver() -> StaticAddressResolver {
        StaticAddressResolver::new()
            .with_route(30, 6, 0x70, 1)
            .with_route(31, 9, 0x70, 0)
            .with_route(32, 5, 0x70, 2)
            .with_route(33, 7, 0x70, 9)
    }

    #[test]
    fn candidates_exclude_own_objects_and_assetless() {
        let r = report("a", Some(1), "S");
        assert!(is_candidate(&r.entry, "xyz.openbmc_project.HsbpManager"));
        assert!(!is_candidate(&r.entry, "xyz.openbmc_project.NVMeSensor"));
        let mut bare = r.entry.clone();
        bare.interfaces = vec![NVME_ITEM.into()];
        assert!(!is_candidate(&bare, "xyz.openbmc_project.HsbpManager"));
    }

    #[test]
    fn second_mux_channel_lands_after_first_mux_channels() {
        let dir = RecordingDirectory::new();
        let backplanes = setup(&dir);
        let placement = locate(&report("a", Some(30), "S1"), &resolver(), &backplanes).unwrap();
        assert_eq!(
            placement,
            Placement::Slot {
                backplane: "HSBP 1".into(),
                slot: 5
            }
        );
    }

    #[test]
    fn pass_attaches_adopts_and_drops() {
        let dir = RecordingDirectory::new();
        let mut backplanes = setup(&dir);
        let mut pool = OwnerlessPool::default();
        let resolver = resolver();
        let correlator = AssetCorrelator::new(&resolver, &dir);

        let summary = correlator.run(
            &mut backplanes,
            &mut pool,
            vec![
                report("slot", Some(30), "S1"),
                report("stray", Some(31), "S2"),
                report("nobus", None, "S3"),
                report("unrouted", Some(99), "S4"),
                report("overflow", Some(33), "S5"),
            ],
        );
        assert_eq!(
            summary,
            CorrelationSummary {
                attached: 1,
                already_attached: 0,
                ownerless: 1,
                dropped: 3,
            }
        );
        assert_eq!(
            dir.inner.get_property(&drive_path(6), ASSET, "SerialNumber"),
            Some(PropertyValue::Str("S1".into()))
        );
        // Two backplanes of eight drives: the stray becomes drive 17.
        assert_eq!(
            dir.inner.get_property(&drive_path(17), ASSET, "SerialNumber"),
            Some(PropertyValue::Str("S2".into()))
        );
    }

    #[test]
    fn repeat_pass_replaces_ownerless_and_keeps_assets() {
        let dir = RecordingDirectory::new();
        let mut backplanes = setup(&dir);
        let mut pool = OwnerlessPool::default();
        let resolver = resolver();
        let correlator = AssetCorrelator::new(&resolver, &dir);
        let reports = vec![report("slot", Some(32), "S1"), report("stray", Some(31), "S2")];

        correlator.run(&mut backplanes, &mut pool, reports.clone());
        let again = correlator.run(&mut backplanes, &mut pool, reports);
        assert_eq!(again.already_attached, 1);
        assert_eq!(again.ownerless, 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.drives().next().map(|d| d.index()), Some(17));
    }

    #[test]
    fn no_backplanes_makes_everything_ownerless() {
        let dir = RecordingDirectory::new();
        let mut backplanes = BTreeMap::new();
        let mut pool = OwnerlessPool::default();
        let resolver = resolver();
        let summary = AssetCorrelator::new(&resolver, &dir).run(
            &mut backplanes,
            &mut pool,
            vec![report("a", Some(30), "S1"), report("b", Some(32), "S2")],
        );
        assert_eq!(summary.ownerless, 2);
        let indices: Vec<_> = pool.drives().map(|d| d.index()).collect();
        assert_eq!(indices, vec![1, 2]);
    }
}
