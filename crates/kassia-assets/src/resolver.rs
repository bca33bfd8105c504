//! Compatibility filtering and install ordering.

use kassia_config::DeviceConfig;

use crate::model::{AssetCatalog, AssetDescriptor, AssetKind, CompatibleAssetSet};

/// Select the drivers and updates that apply to `device` on `os_id`.
///
/// The result is stable-sorted by install order, ties keeping discovery order.
#[must_use]
pub fn resolve(catalog: &AssetCatalog, device: &DeviceConfig, os_id: u32) -> CompatibleAssetSet {
    let families = device.driver_families(os_id);
    let mut selected: Vec<AssetDescriptor> = catalog
        .assets()
        .iter()
        .filter(|asset| matches!(asset.kind, AssetKind::Driver | AssetKind::Update))
        .filter(|asset| asset.supports_os(os_id))
        .filter(|asset| {
            asset.kind != AssetKind::Driver || driver_fits_device(asset, device, &families)
        })
        .cloned()
        .collect();
    selected.sort_by_key(|asset| asset.install_order);
    CompatibleAssetSet::from_ordered(selected)
}

fn driver_fits_device(
    asset: &AssetDescriptor,
    device: &DeviceConfig,
    families: &std::collections::BTreeSet<u32>,
) -> bool {
    let hardware_ok = asset.supported_device_ids.is_empty()
        || !asset
            .supported_device_ids
            .is_disjoint(&device.supported_device_ids);
    let family_ok = asset
        .family_id
        .is_none_or(|family| families.is_empty() || families.contains(&family));
    hardware_ok && family_ok
}
