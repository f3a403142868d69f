//! Hardware probe integration tests against synthetic sysroots.
//!
//! Each test builds a throwaway `/proc` + `/sys` tree in a temp directory and
//! points the probe at it:
//! - Full workstation profile (Intel, NVMe, NUMA, GPU)
//! - AMD virtualization flag equivalents
//! - Degradation when individual queries fail

use std::fs;
use std::path::Path;

use vmod_forge::hardware::HardwareProbe;
use vmod_forge::models::{CpuVendor, GpuVendor, IsaExtension, Microarch, PcieLink, StorageClass};
use vmod_forge::ProbeError;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const INTEL_CPUINFO: &str = "processor\t: 0
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 151
model name\t: 12th Gen Intel(R) Core(TM) i9-12900K
flags\t\t: fpu sse4_2 avx avx2 fma bmi2 aes pclmulqdq sha_ni vaes vpclmulqdq vmx
vmx flags\t: vnmi posted_intr invvpid ept_x_only ept vpid unrestricted_guest vmfunc
";

const AMD_CPUINFO: &str = "processor\t: 0
vendor_id\t: AuthenticAMD
cpu family\t: 25
model\t\t: 97
model name\t: AMD Ryzen 9 7950X 16-Core Processor
flags\t\t: fpu sse4_2 avx avx2 fma bmi2 avx512f avx512bw avx512vl aes pclmulqdq svm npt avic
";

fn workstation(root: &Path) {
    write(root, "proc/cpuinfo", INTEL_CPUINFO);
    write(
        root,
        "proc/meminfo",
        "MemTotal:       65536000 kB\nHugePages_Total:       0\n",
    );
    write(
        root,
        "sys/kernel/mm/transparent_hugepage/enabled",
        "always [madvise] never\n",
    );
    fs::create_dir_all(root.join("sys/devices/system/node/node0")).unwrap();
    fs::create_dir_all(root.join("sys/devices/system/node/node1")).unwrap();
    write(root, "sys/class/nvme/nvme0/device/current_link_speed", "16.0 GT/s PCIe\n");
    write(root, "sys/class/nvme/nvme0/device/current_link_width", "4\n");
    write(root, "sys/class/drm/card0/device/vendor", "0x10de\n");
}

// ============================================================================
// FULL PROFILE
// ============================================================================

/// Every query answers: the profile carries all optional fields.
#[test]
fn test_workstation_profile() {
    let root = tempfile::tempdir().unwrap();
    workstation(root.path());

    let profile = HardwareProbe::new(root.path()).probe().unwrap();

    assert_eq!(profile.cpu.vendor, CpuVendor::Intel);
    assert_eq!(profile.cpu.microarch, Microarch::AlderLake);
    assert!(profile.has(IsaExtension::Avx2));
    assert!(profile.has(IsaExtension::AesNi));
    assert!(!profile.has(IsaExtension::Avx512f));

    assert!(profile.virt.hw_virt);
    assert!(profile.virt.ept);
    assert!(profile.virt.vpid);
    assert!(profile.virt.vmfunc);
    assert!(profile.virt.posted_interrupts);

    let storage = profile.storage.unwrap();
    assert_eq!(storage.class, StorageClass::Nvme);
    assert_eq!(storage.link, Some(PcieLink { generation: 4, lanes: 4 }));

    assert_eq!(profile.memory.numa_nodes, Some(2));
    assert_eq!(profile.memory.huge_pages, Some(true));
    assert_eq!(profile.memory.total_mib, Some(64000));

    assert_eq!(profile.gpu.unwrap().vendor, GpuVendor::Nvidia);
}

/// Probing the same tree twice yields identical snapshots.
#[test]
fn test_probe_is_deterministic() {
    let root = tempfile::tempdir().unwrap();
    workstation(root.path());

    let probe = HardwareProbe::new(root.path());
    assert_eq!(probe.probe().unwrap(), probe.probe().unwrap());
}

// ============================================================================
// VENDOR EQUIVALENTS
// ============================================================================

/// AMD reports svm/npt/avic instead of vmx/ept/posted_intr.
#[test]
fn test_amd_virtualization_equivalents() {
    let root = tempfile::tempdir().unwrap();
    write(root.path(), "proc/cpuinfo", AMD_CPUINFO);

    let profile = HardwareProbe::new(root.path()).probe().unwrap();

    assert_eq!(profile.cpu.vendor, CpuVendor::Amd);
    assert_eq!(profile.cpu.microarch, Microarch::Zen4);
    assert!(profile.virt.hw_virt);
    assert!(profile.virt.ept);
    assert!(profile.virt.posted_interrupts);
    assert!(!profile.virt.vpid);
    assert!(profile.has(IsaExtension::Avx512bw));
}

// ============================================================================
// DEGRADATION
// ============================================================================

/// Only the CPU query is fatal.
#[test]
fn test_missing_cpuinfo_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    workstation(root.path());
    fs::remove_file(root.path().join("proc/cpuinfo")).unwrap();

    let err = HardwareProbe::new(root.path()).probe().unwrap_err();
    assert!(matches!(err, ProbeError::CpuInfoUnavailable(_)));
}

/// Broken storage, memory and GPU queries degrade to absent fields.
#[test]
fn test_partial_probe_gaps_degrade() {
    let root = tempfile::tempdir().unwrap();
    write(root.path(), "proc/cpuinfo", INTEL_CPUINFO);
    write(root.path(), "proc/meminfo", "garbage\n");

    let profile = HardwareProbe::new(root.path()).probe().unwrap();

    assert!(profile.has(IsaExtension::Avx2));
    assert_eq!(profile.storage, None);
    assert_eq!(profile.memory.total_mib, None);
    assert_eq!(profile.memory.numa_nodes, None);
    assert_eq!(profile.gpu, None);
}

/// SATA SSD host without NVMe falls back to the block-device class.
#[test]
fn test_ssd_fallback_without_nvme() {
    let root = tempfile::tempdir().unwrap();
    write(root.path(), "proc/cpuinfo", INTEL_CPUINFO);
    write(root.path(), "sys/block/loop0/queue/rotational", "1\n");
    write(root.path(), "sys/block/sda/queue/rotational", "0\n");

    let profile = HardwareProbe::new(root.path()).probe().unwrap();
    let storage = profile.storage.unwrap();
    assert_eq!(storage.class, StorageClass::Ssd);
    assert_eq!(storage.link, None);
}
