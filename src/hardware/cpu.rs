//! CPU identification, instruction-set and virtualization flag detection.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use crate::error::ProbeError;
use crate::models::{CpuInfo, CpuVendor, IsaExtension, Microarch, VirtCapabilities};

/// Everything read from /proc/cpuinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuFacts {
    pub info: CpuInfo,
    pub isa: BTreeSet<IsaExtension>,
    pub virt: VirtCapabilities,
}

/// Read and parse `<root>/proc/cpuinfo`. This is the only fatal probe.
pub fn detect_cpu(root: &Path) -> Result<CpuFacts, ProbeError> {
    let path = root.join("proc/cpuinfo");
    let content = fs::read_to_string(&path).map_err(|e| {
        ProbeError::CpuInfoUnavailable(format!("{}: {}", path.display(), e))
    })?;
    parse_cpuinfo(&content)
}

/// Parse the first processor block of a cpuinfo dump.
pub fn parse_cpuinfo(content: &str) -> Result<CpuFacts, ProbeError> {
    let mut vendor_id: Option<&str> = None;
    let mut model_name: Option<&str> = None;
    let mut family: Option<u32> = None;
    let mut model: Option<u32> = None;
    let mut flags: HashSet<&str> = HashSet::new();
    let mut saw_flags = false;
    let mut in_block = false;

    for line in content.lines() {
        if line.trim().is_empty() {
            if in_block {
                break;
            }
            continue;
        }
        in_block = true;

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "vendor_id" => vendor_id = Some(value),
            "model name" => model_name = Some(value),
            "cpu family" => family = value.parse().ok(),
            "model" => model = value.parse().ok(),
            // "vmx flags" carries ept/vpid/posted_intr on newer kernels
            "flags" | "vmx flags" => {
                saw_flags = true;
                flags.extend(value.split_whitespace());
            }
            _ => {}
        }
    }

    if vendor_id.is_none() && !saw_flags {
        return Err(ProbeError::CpuInfoUnavailable(
            "cpuinfo has neither vendor_id nor flags".to_string(),
        ));
    }

    let vendor = match vendor_id {
        Some("GenuineIntel") => CpuVendor::Intel,
        Some("AuthenticAMD") => CpuVendor::Amd,
        _ => CpuVendor::Unknown,
    };

    let isa = IsaExtension::ALL
        .iter()
        .copied()
        .filter(|ext| flags.contains(ext.cpuinfo_flag()))
        .collect();

    let virt = VirtCapabilities {
        hw_virt: flags.contains("vmx") || flags.contains("svm"),
        ept: flags.contains("ept") || flags.contains("npt"),
        vpid: flags.contains("vpid"),
        vmfunc: flags.contains("vmfunc"),
        posted_interrupts: flags.contains("posted_intr") || flags.contains("avic"),
    };

    Ok(CpuFacts {
        info: CpuInfo {
            vendor,
            model_name: model_name.unwrap_or("Unknown").to_string(),
            family,
            model,
            microarch: classify_microarch(vendor, family, model),
        },
        isa,
        virt,
    })
}

/// Map vendor/family/model to a microarchitecture.
pub fn classify_microarch(vendor: CpuVendor, family: Option<u32>, model: Option<u32>) -> Microarch {
    let (Some(family), Some(model)) = (family, model) else {
        return Microarch::Unknown;
    };

    match (vendor, family) {
        (CpuVendor::Intel, 6) => match model {
            0x4e | 0x5e | 0x8e | 0x9e | 0xa5 | 0xa6 => Microarch::Skylake,
            0x55 => Microarch::SkylakeAvx512,
            0x6a | 0x6c | 0x7d | 0x7e => Microarch::IceLake,
            0x8c | 0x8d => Microarch::TigerLake,
            0x97 | 0x9a => Microarch::AlderLake,
            0xb7 | 0xba | 0xbf => Microarch::RaptorLake,
            0xaa | 0xac => Microarch::MeteorLake,
            _ => Microarch::Unknown,
        },
        (CpuVendor::Amd, 0x17) if model < 0x30 => Microarch::Zen,
        (CpuVendor::Amd, 0x17) => Microarch::Zen2,
        (CpuVendor::Amd, 0x19) => match model {
            0x10..=0x1f | 0x60..=0x7f | 0xa0..=0xaf => Microarch::Zen4,
            _ => Microarch::Zen3,
        },
        (CpuVendor::Amd, 0x1a) => Microarch::Zen5,
        _ => Microarch::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAPTOR_LAKE: &str = "processor\t: 0
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 183
model name\t: 13th Gen Intel(R) Core(TM) i7-13700K
flags\t\t: fpu vme sse4_2 avx avx2 fma bmi2 pclmulqdq sha_ni vaes vpclmulqdq vmx ept vpid
vmx flags\t: vnmi preemption_timer posted_intr invvpid ept_x_only ept_ad flexpriority ept vpid unrestricted_guest vmfunc

processor\t: 1
vendor_id\t: GenuineIntel
flags\t\t: fpu avx512f
";

    #[test]
    fn test_parse_intel_block() {
        let facts = parse_cpuinfo(RAPTOR_LAKE).unwrap();
        assert_eq!(facts.info.vendor, CpuVendor::Intel);
        assert_eq!(facts.info.microarch, Microarch::RaptorLake);
        assert!(facts.isa.contains(&IsaExtension::Avx2));
        assert!(facts.isa.contains(&IsaExtension::Sha));
        // aes token absent, avx512f only in the second block
        assert!(!facts.isa.contains(&IsaExtension::AesNi));
        assert!(!facts.isa.contains(&IsaExtension::Avx512f));
        assert!(facts.virt.hw_virt && facts.virt.ept && facts.virt.vpid);
        assert!(facts.virt.vmfunc && facts.virt.posted_interrupts);
    }

    #[test]
    fn test_parse_amd_virt_equivalents() {
        let content = "vendor_id\t: AuthenticAMD
cpu family\t: 25
model\t\t: 97
model name\t: AMD Ryzen 9 7950X
flags\t\t: avx avx2 aes svm npt avic avx512f
";
        let facts = parse_cpuinfo(content).unwrap();
        assert_eq!(facts.info.microarch, Microarch::Zen4);
        assert!(facts.virt.hw_virt);
        assert!(facts.virt.ept);
        assert!(facts.virt.posted_interrupts);
        assert!(!facts.virt.vpid);
        assert!(facts.isa.contains(&IsaExtension::AesNi));
    }

    #[test]
    fn test_empty_cpuinfo_is_fatal() {
        assert!(parse_cpuinfo("").is_err());
        assert!(parse_cpuinfo("processor : 0\nbogomips : 1.0\n").is_err());
    }

    #[test]
    fn test_flag_substrings_do_not_match() {
        // "avx512_vnni" must not count as avx, "aes" must be a whole token
        let facts = parse_cpuinfo("vendor_id : GenuineIntel\nflags : avx512_vnni aesx\n").unwrap();
        assert!(facts.isa.is_empty());
    }

    #[test]
    fn test_classify_unknown_without_family() {
        assert_eq!(classify_microarch(CpuVendor::Intel, None, Some(0x97)), Microarch::Unknown);
        assert_eq!(classify_microarch(CpuVendor::Amd, Some(0x17), Some(0x71)), Microarch::Zen2);
    }
}
