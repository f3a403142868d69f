//! Hardware probe public API module.
//!
//! This module aggregates all hardware detection functionality and provides
//! a unified entry point producing one immutable [`HardwareProfile`] per run.
//!
//! Every query reads below a configurable root (normally `/`), so tests can
//! point the probe at a synthetic `/proc` + `/sys` tree.

pub mod cpu;
pub mod gpu;
pub mod memory;
pub mod storage;

pub use cpu::{classify_microarch, detect_cpu, parse_cpuinfo, CpuFacts};
pub use gpu::detect_gpu;
pub use memory::detect_memory;
pub use storage::detect_storage;

use std::path::{Path, PathBuf};

use crate::error::ProbeError;
use crate::models::HardwareProfile;

/// Read-only host capability probe.
///
/// # Graceful Degradation Strategy
///
/// - **CPU**: fatal if /proc/cpuinfo is unreadable or carries no vendor/flags
/// - **Storage**: `None` if neither NVMe controllers nor block devices are readable
/// - **Memory**: each of NUMA node count, huge pages and total RAM independently `None`
/// - **GPU**: `None` if no DRM card is exposed
///
/// # Examples
///
/// ```ignore
/// let profile = HardwareProbe::system().probe()?;
/// println!("CPU: {}", profile.cpu.model_name);
/// ```
#[derive(Debug, Clone)]
pub struct HardwareProbe {
    root: PathBuf,
}

impl HardwareProbe {
    /// Probe rooted at an arbitrary directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        HardwareProbe { root: root.into() }
    }

    /// Probe the running host.
    pub fn system() -> Self {
        Self::new("/")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take a capability snapshot.
    pub fn probe(&self) -> Result<HardwareProfile, ProbeError> {
        let cpu = detect_cpu(&self.root)?;

        let storage = detect_storage(&self.root);
        if storage.is_none() {
            log::debug!("[Probe] Storage class could not be determined");
        }

        let memory = detect_memory(&self.root);
        if memory.numa_nodes.is_none() {
            log::debug!("[Probe] NUMA topology unavailable");
        }

        let gpu = detect_gpu(&self.root);
        if gpu.is_none() {
            log::debug!("[Probe] No GPU detected");
        }

        let profile = HardwareProfile {
            cpu: cpu.info,
            isa: cpu.isa,
            virt: cpu.virt,
            storage,
            memory,
            gpu,
        };

        log::info!(
            "[Probe] {} ({:?}), {} ISA extensions, virt={}, storage={:?}",
            profile.cpu.model_name,
            profile.cpu.microarch,
            profile.isa.len(),
            profile.virt.hw_virt,
            profile.storage.map(|s| s.class)
        );

        Ok(profile)
    }
}

impl Default for HardwareProbe {
    fn default() -> Self {
        Self::system()
    }
}
