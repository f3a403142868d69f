//! GPU vendor and VRAM detection via /sys/class/drm.

use std::fs;
use std::path::Path;

use crate::models::{GpuInfo, GpuVendor};

/// Detect the first DRM card. `None` when no card is exposed.
pub fn detect_gpu(root: &Path) -> Option<GpuInfo> {
    let drm = root.join("sys/class/drm");
    let entries = fs::read_dir(&drm).ok()?;

    // connectors look like "card0-DP-1"; only bare "cardN" entries are devices
    let mut cards: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with("card") && !n.contains('-'))
        .collect();
    cards.sort();

    let device = drm.join(cards.first()?).join("device");
    let vendor = fs::read_to_string(device.join("vendor"))
        .ok()
        .and_then(|id| vendor_from_id(&id))
        .unwrap_or(GpuVendor::Unknown);

    // amdgpu exposes VRAM size in bytes; other drivers do not
    let vram_mib = fs::read_to_string(device.join("mem_info_vram_total"))
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|bytes| bytes / (1024 * 1024));

    Some(GpuInfo { vendor, vram_mib })
}

/// Parse a PCI vendor ID such as `0x10de`.
pub fn vendor_from_id(vendor_str: &str) -> Option<GpuVendor> {
    match vendor_str.trim().to_lowercase().as_str() {
        "0x10de" => Some(GpuVendor::Nvidia),
        "0x1002" => Some(GpuVendor::Amd),
        "0x8086" => Some(GpuVendor::Intel),
        "0x15ad" => Some(GpuVendor::Vmware),
        _ => None,
    }
}
