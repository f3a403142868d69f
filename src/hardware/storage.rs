//! Primary storage device detection.
//!
//! Detection follows a priority order: NVMe > SSD > HDD. For NVMe the
//! negotiated PCIe link of the first controller is read as well, since the
//! policy engine scales its I/O defines by link bandwidth.

use std::fs;
use std::path::Path;

use crate::models::{PcieLink, StorageClass, StorageInfo};

/// Block device name prefixes that are never a primary disk.
const VIRTUAL_BLOCK_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "sr", "md", "nbd"];

/// Detect the primary storage device, `None` if nothing could be determined.
pub fn detect_storage(root: &Path) -> Option<StorageInfo> {
    if let Some(controller) = first_nvme_controller(root) {
        let device = root.join("sys/class/nvme").join(&controller).join("device");
        return Some(StorageInfo {
            class: StorageClass::Nvme,
            link: read_pcie_link(&device),
        });
    }

    detect_block_class(root).map(|class| StorageInfo { class, link: None })
}

fn first_nvme_controller(root: &Path) -> Option<String> {
    let entries = fs::read_dir(root.join("sys/class/nvme")).ok()?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with("nvme"))
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Read `current_link_speed` / `current_link_width` of a PCI device.
pub fn read_pcie_link(device: &Path) -> Option<PcieLink> {
    let speed = fs::read_to_string(device.join("current_link_speed")).ok()?;
    let width = fs::read_to_string(device.join("current_link_width")).ok()?;

    let generation = pcie_generation(&speed)?;
    let lanes = width.trim().parse::<u8>().ok().filter(|l| *l > 0)?;
    Some(PcieLink { generation, lanes })
}

/// Map a sysfs link speed such as "16.0 GT/s PCIe" to a PCIe generation.
pub fn pcie_generation(speed: &str) -> Option<u8> {
    let gts: f32 = speed.split_whitespace().next()?.parse().ok()?;
    let generation = match gts {
        s if s >= 64.0 => 6,
        s if s >= 32.0 => 5,
        s if s >= 16.0 => 4,
        s if s >= 8.0 => 3,
        s if s >= 5.0 => 2,
        s if s >= 2.5 => 1,
        _ => return None,
    };
    Some(generation)
}

fn detect_block_class(root: &Path) -> Option<StorageClass> {
    let entries = fs::read_dir(root.join("sys/block")).ok()?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| !VIRTUAL_BLOCK_PREFIXES.iter().any(|p| n.starts_with(p)))
        .collect();
    names.sort();

    names.iter().find_map(|name| {
        let rotational =
            fs::read_to_string(root.join("sys/block").join(name).join("queue/rotational")).ok()?;
        match rotational.trim() {
            "0" => Some(StorageClass::Ssd),
            "1" => Some(StorageClass::Hdd),
            _ => None,
        }
    })
}
