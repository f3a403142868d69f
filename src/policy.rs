//! Optimization policy engine: hardware profile + mode -> compiler flags.
//!
//! Optimized builds are derived by evaluating [`OPTIMIZED_RULES`] in order.
//! Each rule is an independent predicate -> contribution over the profile, so
//! supporting a new capability means appending a rule, not editing others.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    FlagCategory, FlagSet, GpuVendor, HardwareProfile, IsaExtension, Microarch,
    OptimizationMode, StorageClass,
};

/// Vanilla compile flags, independent of hardware.
const VANILLA_COMPILE: &[&str] = &["-O2", "-pipe"];
const VANILLA_DEFINES: &[&str] = &["VMW_BUILD_VANILLA"];

/// Unconditional flags for optimized builds.
const AGGRESSIVE_COMPILE: &[&str] = &["-O3", "-pipe", "-funroll-loops", "-ffast-math"];
const AGGRESSIVE_LINK: &[&str] = &["-O1"];
const AGGRESSIVE_DEFINES: &[&str] = &["VMW_BUILD_OPTIMIZED", "VMW_BRANCH_HINTS", "VMW_PREFETCH"];

const MAX_IO_QUEUE_DEPTH: u32 = 1024;

/// Extensions to leave out on specific microarchitectures.
///
/// Empty by default; omission always wins over inclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Errata {
    suppressed: BTreeMap<Microarch, BTreeSet<IsaExtension>>,
}

impl Errata {
    pub fn none() -> Self {
        Self::default()
    }

    /// Suppress `ext` on `microarch`.
    pub fn suppress(mut self, microarch: Microarch, ext: IsaExtension) -> Self {
        self.suppressed.entry(microarch).or_default().insert(ext);
        self
    }

    pub fn is_suppressed(&self, microarch: Microarch, ext: IsaExtension) -> bool {
        self.suppressed
            .get(&microarch)
            .map_or(false, |set| set.contains(&ext))
    }
}

/// One entry of the optimized rule table.
pub struct PolicyRule {
    pub name: &'static str,
    /// Adds flags for `profile` and returns rationale lines (empty = not fired).
    pub apply: fn(&HardwareProfile, &Errata, &mut FlagSet) -> Vec<String>,
}

/// Rule table for optimized builds, in evaluation order.
pub const OPTIMIZED_RULES: &[PolicyRule] = &[
    PolicyRule { name: "aggressive-generic", apply: rule_aggressive_generic },
    PolicyRule { name: "microarch-tuning", apply: rule_microarch_tuning },
    PolicyRule { name: "instruction-set", apply: rule_instruction_set },
    PolicyRule { name: "virtualization", apply: rule_virtualization },
    PolicyRule { name: "nvme-io-path", apply: rule_nvme },
    PolicyRule { name: "numa", apply: rule_numa },
    PolicyRule { name: "huge-pages", apply: rule_huge_pages },
    PolicyRule { name: "host-gpu", apply: rule_host_gpu },
];

/// Flags plus the reasons they were chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub mode: OptimizationMode,
    pub flags: FlagSet,
    pub rationale: Vec<String>,
}

/// Suggested mode with its 0-100 optimization score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRecommendation {
    pub mode: OptimizationMode,
    pub score: u32,
}

/// Policy engine. Pure: identical inputs always yield identical flags.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    errata: Errata,
}

impl PolicyEngine {
    pub fn new(errata: Errata) -> Self {
        PolicyEngine { errata }
    }

    pub fn errata(&self) -> &Errata {
        &self.errata
    }

    /// Flags for `profile` in `mode`.
    pub fn build_flags(&self, profile: &HardwareProfile, mode: OptimizationMode) -> FlagSet {
        self.decide(profile, mode).flags
    }

    /// Flags and human-readable rationale.
    pub fn decide(&self, profile: &HardwareProfile, mode: OptimizationMode) -> PolicyDecision {
        let mut flags = FlagSet::new();
        let mut rationale = Vec::new();

        match mode {
            OptimizationMode::Vanilla => {
                push_all(&mut flags, FlagCategory::Compile, VANILLA_COMPILE);
                push_all(&mut flags, FlagCategory::Define, VANILLA_DEFINES);
                rationale.push("vanilla: portable baseline, hardware ignored".to_string());
            }
            OptimizationMode::Optimized => {
                for rule in OPTIMIZED_RULES {
                    let reasons = (rule.apply)(profile, &self.errata, &mut flags);
                    rationale.extend(reasons.into_iter().map(|r| format!("{}: {}", rule.name, r)));
                }
            }
        }

        PolicyDecision {
            mode,
            flags,
            rationale,
        }
    }
}

/// IOMMU configuration is part of optimized builds on hosts with VT-x/AMD-V.
pub fn wants_iommu(profile: &HardwareProfile, mode: OptimizationMode) -> bool {
    mode == OptimizationMode::Optimized && profile.virt.hw_virt
}

/// Score how much an optimized build would gain on this host.
pub fn recommend_mode(profile: &HardwareProfile) -> ModeRecommendation {
    let mut score: u32 = 20;

    if profile.has(IsaExtension::Avx2) {
        score += 15;
    }
    if profile.has(IsaExtension::Avx512f) {
        score += 10;
    }
    if profile.has(IsaExtension::AesNi) {
        score += 10;
    }
    if profile.virt.hw_virt {
        score += 15;
    }
    if profile.virt.ept {
        score += 10;
    }
    if matches!(profile.storage.map(|s| s.class), Some(StorageClass::Nvme)) {
        score += 10;
    }
    if profile.memory.numa_nodes.map_or(false, |n| n > 1) {
        score += 5;
    }
    if profile.memory.huge_pages == Some(true) {
        score += 5;
    }
    if profile.cpu.microarch != Microarch::Unknown {
        score += 5;
    }

    let score = score.min(100);
    let mode = if score >= 50 {
        OptimizationMode::Optimized
    } else {
        OptimizationMode::Vanilla
    };
    ModeRecommendation { mode, score }
}

fn push_all(flags: &mut FlagSet, category: FlagCategory, values: &[&str]) {
    for value in values {
        flags.push(category, *value);
    }
}

fn rule_aggressive_generic(_: &HardwareProfile, _: &Errata, flags: &mut FlagSet) -> Vec<String> {
    push_all(flags, FlagCategory::Compile, AGGRESSIVE_COMPILE);
    push_all(flags, FlagCategory::Link, AGGRESSIVE_LINK);
    push_all(flags, FlagCategory::Define, AGGRESSIVE_DEFINES);
    vec!["-O3, loop unrolling and relaxed floating point".to_string()]
}

fn rule_microarch_tuning(profile: &HardwareProfile, _: &Errata, flags: &mut FlagSet) -> Vec<String> {
    match profile.cpu.microarch.tune_name() {
        // -mtune only schedules; it never enables instructions
        Some(tune) => {
            flags.push(FlagCategory::Compile, format!("-mtune={}", tune));
            vec![format!("scheduling tuned for {}", tune)]
        }
        None => Vec::new(),
    }
}

fn rule_instruction_set(profile: &HardwareProfile, errata: &Errata, flags: &mut FlagSet) -> Vec<String> {
    let microarch = profile.cpu.microarch;
    let mut enabled = Vec::new();
    let mut reasons = Vec::new();

    for ext in &profile.isa {
        if errata.is_suppressed(microarch, *ext) {
            reasons.push(format!("{} omitted (errata on {:?})", ext.label(), microarch));
            continue;
        }
        flags.push(FlagCategory::Compile, ext.compiler_flag());
        flags.push(FlagCategory::Define, ext.feature_define());
        enabled.push(ext.label());
    }

    if !enabled.is_empty() {
        reasons.insert(0, format!("detected {}", enabled.join(", ")));
    }
    reasons
}

fn rule_virtualization(profile: &HardwareProfile, _: &Errata, flags: &mut FlagSet) -> Vec<String> {
    let virt = profile.virt;
    let features = [
        (virt.hw_virt, "VMW_HW_VIRT", "VT-x/AMD-V"),
        (virt.ept, "VMW_EPT_AWARE", "EPT/NPT"),
        (virt.vpid, "VMW_VPID", "VPID"),
        (virt.vmfunc, "VMW_VMFUNC", "VMFUNC"),
        (virt.posted_interrupts, "VMW_POSTED_INTR", "posted interrupts"),
    ];

    let mut present = Vec::new();
    for (available, define, label) in features {
        if available {
            flags.push(FlagCategory::Define, define);
            present.push(label);
        }
    }

    if present.is_empty() {
        Vec::new()
    } else {
        vec![format!("virtualization code paths for {}", present.join(", "))]
    }
}

fn rule_nvme(profile: &HardwareProfile, _: &Errata, flags: &mut FlagSet) -> Vec<String> {
    let Some(storage) = profile.storage else {
        return Vec::new();
    };
    if storage.class != StorageClass::Nvme {
        return Vec::new();
    }

    flags.push(FlagCategory::Define, "VMW_NVME_IO_PATH");
    match storage.link {
        Some(link) => {
            let depth = (32 * u32::from(link.generation) * u32::from(link.lanes)).min(MAX_IO_QUEUE_DEPTH);
            flags.push(FlagCategory::Define, format!("VMW_IO_QUEUE_DEPTH={}", depth));
            vec![format!(
                "NVMe PCIe gen{} x{}, I/O queue depth {}",
                link.generation, link.lanes, depth
            )]
        }
        None => vec!["NVMe detected, link width unknown".to_string()],
    }
}

fn rule_numa(profile: &HardwareProfile, _: &Errata, flags: &mut FlagSet) -> Vec<String> {
    match profile.memory.numa_nodes {
        Some(nodes) if nodes > 1 => {
            flags.push(FlagCategory::Define, "VMW_NUMA_AWARE");
            flags.push(FlagCategory::Define, format!("VMW_NUMA_NODES={}", nodes));
            vec![format!("{} NUMA nodes", nodes)]
        }
        _ => Vec::new(),
    }
}

fn rule_huge_pages(profile: &HardwareProfile, _: &Errata, flags: &mut FlagSet) -> Vec<String> {
    if profile.memory.huge_pages == Some(true) {
        flags.push(FlagCategory::Define, "VMW_HUGEPAGES");
        vec!["huge pages available".to_string()]
    } else {
        Vec::new()
    }
}

fn rule_host_gpu(profile: &HardwareProfile, _: &Errata, flags: &mut FlagSet) -> Vec<String> {
    let define = match profile.gpu.map(|g| g.vendor) {
        Some(GpuVendor::Nvidia) => "VMW_HOST_GPU_NVIDIA",
        Some(GpuVendor::Amd) => "VMW_HOST_GPU_AMD",
        Some(GpuVendor::Intel) => "VMW_HOST_GPU_INTEL",
        _ => return Vec::new(),
    };
    flags.push(FlagCategory::Define, define);
    vec![format!("host GPU define {}", define)]
}
