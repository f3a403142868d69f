//! Memory topology detection: NUMA nodes, huge pages and total RAM.

use std::fs;
use std::path::Path;

use crate::models::MemoryTopology;

/// Detect memory topology. Every field degrades to `None` independently.
pub fn detect_memory(root: &Path) -> MemoryTopology {
    let meminfo = fs::read_to_string(root.join("proc/meminfo")).ok();

    let total_mib = meminfo
        .as_deref()
        .and_then(|m| meminfo_value(m, "MemTotal"))
        .map(|kb| kb / 1024);

    let static_pages = meminfo
        .as_deref()
        .and_then(|m| meminfo_value(m, "HugePages_Total"));
    let thp = detect_transparent_hugepages(root);

    let huge_pages = match (static_pages, thp) {
        (None, None) => None,
        (pages, thp) => Some(pages.unwrap_or(0) > 0 || thp.unwrap_or(false)),
    };

    MemoryTopology {
        numa_nodes: detect_numa_nodes(root),
        huge_pages,
        total_mib,
    }
}

/// Count `nodeN` entries under /sys/devices/system/node.
pub fn detect_numa_nodes(root: &Path) -> Option<u32> {
    let entries = fs::read_dir(root.join("sys/devices/system/node")).ok()?;
    let count = entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .map_or(false, |id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        })
        .count() as u32;

    if count == 0 {
        None
    } else {
        Some(count)
    }
}

/// `Some(true)` when THP is set to `always` or `madvise`.
fn detect_transparent_hugepages(root: &Path) -> Option<bool> {
    let mode = fs::read_to_string(root.join("sys/kernel/mm/transparent_hugepage/enabled")).ok()?;
    Some(mode.contains("[always]") || mode.contains("[madvise]"))
}

fn meminfo_value(content: &str, field: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let (key, rest) = line.split_once(':')?;
        if key.trim() != field {
            return None;
        }
        rest.split_whitespace().next()?.parse().ok()
    })
}
