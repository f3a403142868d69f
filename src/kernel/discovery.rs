//! Installed kernel enumeration.
//!
//! Scans `<root>/lib/modules` for installed kernels, marks the running one and
//! checks that build headers are present.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::kernel::compat::CompatTable;
use crate::kernel::resolver::is_supported;
use crate::kernel::version::KernelVersion;
use crate::models::KernelTarget;

/// A kernel found under /lib/modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledKernel {
    pub target: KernelTarget,
    pub headers_installed: bool,
    pub headers_path: PathBuf,
    pub supported: bool,
}

impl InstalledKernel {
    /// Usable as a rebuild target: supported and headers present.
    pub fn is_buildable(&self) -> bool {
        self.supported && self.headers_installed
    }
}

/// Release of the running kernel, read from `<root>/proc/sys/kernel/osrelease`.
pub fn running_release(root: &Path) -> Option<String> {
    fs::read_to_string(root.join("proc/sys/kernel/osrelease"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// List installed kernels, sorted by version then release string.
pub fn discover_kernels(root: &Path, table: &CompatTable) -> Vec<InstalledKernel> {
    let modules_dir = root.join("lib/modules");
    let current = running_release(root);

    let entries = match fs::read_dir(&modules_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!(
                "[Kernels] Cannot read {}: {}",
                modules_dir.display(),
                e
            );
            return Vec::new();
        }
    };

    let mut kernels = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(release) = entry.file_name().into_string() else {
            continue;
        };

        let version = match KernelVersion::from_release(&release) {
            Ok(v) => v,
            Err(_) => {
                log::debug!("[Kernels] Skipping unparseable module dir '{}'", release);
                continue;
            }
        };

        let headers_path = path.join("build");
        let is_running = current.as_deref() == Some(release.as_str());

        kernels.push(InstalledKernel {
            supported: is_supported(table, &version),
            headers_installed: headers_path.is_dir(),
            headers_path,
            target: KernelTarget::new(release, version, is_running),
        });
    }

    kernels.sort_by(|a, b| {
        a.target
            .version
            .cmp(&b.target.version)
            .then_with(|| a.target.release.cmp(&b.target.release))
    });
    kernels
}
