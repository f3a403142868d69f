//! Core data types for vmod_forge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::kernel::version::KernelVersion;

/// CPU vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CpuVendor {
    Intel,
    Amd,
    Unknown,
}

/// CPU microarchitecture, as far as it matters for `-mtune`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Microarch {
    Skylake,
    SkylakeAvx512,
    IceLake,
    TigerLake,
    AlderLake,
    RaptorLake,
    MeteorLake,
    Zen,
    Zen2,
    Zen3,
    Zen4,
    Zen5,
    Unknown,
}

impl Microarch {
    /// GCC/Clang `-mtune=` value, if the compilers know this core.
    pub fn tune_name(&self) -> Option<&'static str> {
        match self {
            Microarch::Skylake => Some("skylake"),
            Microarch::SkylakeAvx512 => Some("skylake-avx512"),
            Microarch::IceLake => Some("icelake-client"),
            Microarch::TigerLake => Some("tigerlake"),
            Microarch::AlderLake => Some("alderlake"),
            Microarch::RaptorLake => Some("raptorlake"),
            Microarch::MeteorLake => Some("meteorlake"),
            Microarch::Zen => Some("znver1"),
            Microarch::Zen2 => Some("znver2"),
            Microarch::Zen3 => Some("znver3"),
            Microarch::Zen4 => Some("znver4"),
            Microarch::Zen5 => Some("znver5"),
            Microarch::Unknown => None,
        }
    }
}

/// Instruction-set extensions the policy engine knows how to exploit.
///
/// Variant order is the order flags are emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsaExtension {
    Sse42,
    Avx,
    Avx2,
    Fma,
    Bmi2,
    Avx512f,
    Avx512bw,
    Avx512vl,
    AesNi,
    Pclmulqdq,
    Sha,
    Vaes,
    Vpclmulqdq,
}

impl IsaExtension {
    pub const ALL: [IsaExtension; 13] = [
        IsaExtension::Sse42,
        IsaExtension::Avx,
        IsaExtension::Avx2,
        IsaExtension::Fma,
        IsaExtension::Bmi2,
        IsaExtension::Avx512f,
        IsaExtension::Avx512bw,
        IsaExtension::Avx512vl,
        IsaExtension::AesNi,
        IsaExtension::Pclmulqdq,
        IsaExtension::Sha,
        IsaExtension::Vaes,
        IsaExtension::Vpclmulqdq,
    ];

    /// Token used for this extension in the `flags` line of /proc/cpuinfo.
    pub fn cpuinfo_flag(&self) -> &'static str {
        match self {
            IsaExtension::Sse42 => "sse4_2",
            IsaExtension::Avx => "avx",
            IsaExtension::Avx2 => "avx2",
            IsaExtension::Fma => "fma",
            IsaExtension::Bmi2 => "bmi2",
            IsaExtension::Avx512f => "avx512f",
            IsaExtension::Avx512bw => "avx512bw",
            IsaExtension::Avx512vl => "avx512vl",
            IsaExtension::AesNi => "aes",
            IsaExtension::Pclmulqdq => "pclmulqdq",
            IsaExtension::Sha => "sha_ni",
            IsaExtension::Vaes => "vaes",
            IsaExtension::Vpclmulqdq => "vpclmulqdq",
        }
    }

    /// Compiler flag enabling code generation for this extension.
    pub fn compiler_flag(&self) -> &'static str {
        match self {
            IsaExtension::Sse42 => "-msse4.2",
            IsaExtension::Avx => "-mavx",
            IsaExtension::Avx2 => "-mavx2",
            IsaExtension::Fma => "-mfma",
            IsaExtension::Bmi2 => "-mbmi2",
            IsaExtension::Avx512f => "-mavx512f",
            IsaExtension::Avx512bw => "-mavx512bw",
            IsaExtension::Avx512vl => "-mavx512vl",
            IsaExtension::AesNi => "-maes",
            IsaExtension::Pclmulqdq => "-mpclmul",
            IsaExtension::Sha => "-msha",
            IsaExtension::Vaes => "-mvaes",
            IsaExtension::Vpclmulqdq => "-mvpclmulqdq",
        }
    }

    /// Feature define exposed to the module sources.
    pub fn feature_define(&self) -> String {
        format!("VMW_HAVE_{}", self.label().replace(['-', '.'], "_"))
    }

    /// Human-readable name.
    pub fn label(&self) -> &'static str {
        match self {
            IsaExtension::Sse42 => "SSE4.2",
            IsaExtension::Avx => "AVX",
            IsaExtension::Avx2 => "AVX2",
            IsaExtension::Fma => "FMA",
            IsaExtension::Bmi2 => "BMI2",
            IsaExtension::Avx512f => "AVX512F",
            IsaExtension::Avx512bw => "AVX512BW",
            IsaExtension::Avx512vl => "AVX512VL",
            IsaExtension::AesNi => "AES-NI",
            IsaExtension::Pclmulqdq => "PCLMULQDQ",
            IsaExtension::Sha => "SHA",
            IsaExtension::Vaes => "VAES",
            IsaExtension::Vpclmulqdq => "VPCLMULQDQ",
        }
    }
}

/// CPU identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub vendor: CpuVendor,
    pub model_name: String,
    pub family: Option<u32>,
    pub model: Option<u32>,
    pub microarch: Microarch,
}

/// Virtualization extension flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtCapabilities {
    pub hw_virt: bool,           // VT-x / AMD-V
    pub ept: bool,               // EPT / NPT
    pub vpid: bool,              // VPID
    pub vmfunc: bool,            // VM functions
    pub posted_interrupts: bool, // posted_intr / AVIC
}

/// Storage class of the primary device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageClass {
    Nvme,
    Ssd,
    Hdd,
}

/// Negotiated PCIe link of an NVMe controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcieLink {
    pub generation: u8,
    pub lanes: u8,
}

/// Primary storage device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub class: StorageClass,
    pub link: Option<PcieLink>,
}

/// Memory topology. Absent fields could not be determined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTopology {
    pub numa_nodes: Option<u32>,
    pub huge_pages: Option<bool>,
    pub total_mib: Option<u64>,
}

/// GPU vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Vmware,
    Unknown,
}

/// Primary GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub vendor: GpuVendor,
    pub vram_mib: Option<u64>,
}

/// Immutable snapshot of host capabilities, produced once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub cpu: CpuInfo,
    pub isa: BTreeSet<IsaExtension>,
    pub virt: VirtCapabilities,
    pub storage: Option<StorageInfo>,
    pub memory: MemoryTopology,
    pub gpu: Option<GpuInfo>,
}

impl HardwareProfile {
    /// Profile of a CPU with no detected capabilities.
    pub fn baseline(vendor: CpuVendor) -> Self {
        HardwareProfile {
            cpu: CpuInfo {
                vendor,
                model_name: "Unknown".to_string(),
                family: None,
                model: None,
                microarch: Microarch::Unknown,
            },
            isa: BTreeSet::new(),
            virt: VirtCapabilities::default(),
            storage: None,
            memory: MemoryTopology::default(),
            gpu: None,
        }
    }

    pub fn has(&self, ext: IsaExtension) -> bool {
        self.isa.contains(&ext)
    }
}

/// A kernel selected for rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelTarget {
    /// Full release string, e.g. `6.17.2-arch1-1`.
    pub release: String,
    pub version: KernelVersion,
    pub is_running: bool,
}

impl KernelTarget {
    pub fn new(release: impl Into<String>, version: KernelVersion, is_running: bool) -> Self {
        KernelTarget {
            release: release.into(),
            version,
            is_running,
        }
    }

    /// Parse a target from a release string.
    pub fn parse(release: &str, is_running: bool) -> Result<Self, crate::error::ResolveError> {
        let version = KernelVersion::from_release(release)?;
        Ok(KernelTarget::new(release, version, is_running))
    }
}

/// Build mode chosen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    Optimized,
    Vanilla,
}

impl fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationMode::Optimized => write!(f, "optimized"),
            OptimizationMode::Vanilla => write!(f, "vanilla"),
        }
    }
}

impl FromStr for OptimizationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "optimized" => Ok(OptimizationMode::Optimized),
            "vanilla" => Ok(OptimizationMode::Vanilla),
            _ => Err(format!("Unknown optimization mode: {}", s)),
        }
    }
}

impl Default for OptimizationMode {
    fn default() -> Self {
        OptimizationMode::Optimized
    }
}

/// Flag category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagCategory {
    Compile,
    Link,
    Define,
}

/// Category -> ordered, duplicate-free flag list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet {
    flags: BTreeMap<FlagCategory, Vec<String>>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a flag; a flag already present in the category is ignored.
    pub fn push(&mut self, category: FlagCategory, flag: impl Into<String>) {
        let flag = flag.into();
        let entry = self.flags.entry(category).or_default();
        if !entry.contains(&flag) {
            entry.push(flag);
        }
    }

    pub fn get(&self, category: FlagCategory) -> &[String] {
        self.flags.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, category: FlagCategory, flag: &str) -> bool {
        self.get(category).iter().any(|f| f == flag)
    }

    /// Whether `flag` appears in any category.
    pub fn mentions(&self, flag: &str) -> bool {
        self.flags.values().flatten().any(|f| f == flag)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.values().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlagCategory, &Vec<String>)> {
        self.flags.iter()
    }
}

/// Toolchain constraint attached to a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainConstraint {
    /// Object validation tool requires annotation markers in the sources.
    Objtool,
    /// Only needed when compiling with GCC at or above this major version.
    GccAtLeast(u32),
}

/// Applicability predicate for a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applicability {
    pub min_kernel: KernelVersion,
    pub toolchain: Option<ToolchainConstraint>,
}

/// One patch in a resolved patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEntry {
    pub id: String,
    pub applicability: Applicability,
    pub description: String,
}

/// Ordered patches for one kernel. Later patches assume earlier ones are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub patches: Vec<PatchEntry>,
    /// Resolved through a nearest-version fallback rather than an exact series match.
    pub best_effort: bool,
    /// Table series the patches came from, e.g. `6.17`.
    pub matched_series: String,
    pub table_revision: u32,
}

impl PatchSet {
    pub fn ids(&self) -> Vec<&str> {
        self.patches.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Verified clean source handed to the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedSource {
    pub location: PathBuf,
    pub backup_id: u64,
    pub hash: String,
}

/// Everything the external builder needs for one kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub target: KernelTarget,
    pub mode: OptimizationMode,
    pub patches: PatchSet,
    pub flags: FlagSet,
    pub rationale: Vec<String>,
    pub modules: Vec<String>,
    pub source: VerifiedSource,
    /// Enable IOMMU kernel parameters after install (optimized builds on VT-x/AMD-V hosts).
    pub configure_iommu: bool,
}

/// One backup event in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub hash: String,
    pub is_original: bool,
    pub location: PathBuf,
    pub file_count: usize,
}
