//! Optimization policy engine integration tests.
//!
//! - Instruction-set gating (property)
//! - Vanilla constancy (property)
//! - Determinism
//! - Errata suppression
//! - Mode recommendation

use proptest::prelude::*;

use vmod_forge::models::{
    CpuVendor, FlagCategory, GpuInfo, GpuVendor, HardwareProfile, IsaExtension, Microarch,
    OptimizationMode, PcieLink, StorageClass, StorageInfo,
};
use vmod_forge::policy::{recommend_mode, Errata, PolicyEngine};

fn arb_profile() -> impl Strategy<Value = HardwareProfile> {
    (
        proptest::collection::vec(any::<bool>(), IsaExtension::ALL.len()),
        any::<[bool; 5]>(),
        prop_oneof![Just(CpuVendor::Intel), Just(CpuVendor::Amd), Just(CpuVendor::Unknown)],
        proptest::option::of((1u8..=6, prop_oneof![Just(1u8), Just(2), Just(4), Just(8)])),
        proptest::option::of(1u32..=8),
        proptest::option::of(any::<bool>()),
        any::<bool>(),
    )
        .prop_map(|(isa_bits, virt, vendor, link, numa, huge, gpu)| {
            let mut profile = HardwareProfile::baseline(vendor);
            profile.isa = IsaExtension::ALL
                .iter()
                .zip(isa_bits)
                .filter(|(_, on)| *on)
                .map(|(ext, _)| *ext)
                .collect();
            profile.virt.hw_virt = virt[0];
            profile.virt.ept = virt[1];
            profile.virt.vpid = virt[2];
            profile.virt.vmfunc = virt[3];
            profile.virt.posted_interrupts = virt[4];
            profile.storage = link.map(|(generation, lanes)| StorageInfo {
                class: StorageClass::Nvme,
                link: Some(PcieLink { generation, lanes }),
            });
            profile.memory.numa_nodes = numa;
            profile.memory.huge_pages = huge;
            if gpu {
                profile.gpu = Some(GpuInfo {
                    vendor: GpuVendor::Amd,
                    vram_mib: Some(16384),
                });
            }
            profile
        })
}

fn arb_extension() -> impl Strategy<Value = IsaExtension> {
    (0..IsaExtension::ALL.len()).prop_map(|i| IsaExtension::ALL[i])
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    /// An extension absent from the profile never shows up in optimized flags.
    #[test]
    fn prop_absent_extension_never_emitted(mut profile in arb_profile(), ext in arb_extension()) {
        profile.isa.remove(&ext);
        let flags = PolicyEngine::default().build_flags(&profile, OptimizationMode::Optimized);

        prop_assert!(!flags.mentions(ext.compiler_flag()));
        prop_assert!(!flags.mentions(&ext.feature_define()));
    }

    /// Setting an extension adds its flag; clearing it removes it, all else equal.
    #[test]
    fn prop_extension_toggle(mut profile in arb_profile(), ext in arb_extension()) {
        let engine = PolicyEngine::default();

        profile.isa.insert(ext);
        let with = engine.build_flags(&profile, OptimizationMode::Optimized);
        profile.isa.remove(&ext);
        let without = engine.build_flags(&profile, OptimizationMode::Optimized);

        prop_assert!(with.contains(FlagCategory::Compile, ext.compiler_flag()));
        prop_assert!(!without.mentions(ext.compiler_flag()));
    }

    /// Vanilla ignores the hardware entirely.
    #[test]
    fn prop_vanilla_is_constant(a in arb_profile(), b in arb_profile()) {
        let engine = PolicyEngine::default();
        prop_assert_eq!(
            engine.build_flags(&a, OptimizationMode::Vanilla),
            engine.build_flags(&b, OptimizationMode::Vanilla)
        );
    }

    /// Same inputs, same flags, same order.
    #[test]
    fn prop_optimized_is_deterministic(profile in arb_profile()) {
        let engine = PolicyEngine::default();
        prop_assert_eq!(
            engine.decide(&profile, OptimizationMode::Optimized),
            engine.decide(&profile.clone(), OptimizationMode::Optimized)
        );
    }

    /// Flag lists never contain duplicates.
    #[test]
    fn prop_no_duplicate_flags(profile in arb_profile()) {
        let flags = PolicyEngine::default().build_flags(&profile, OptimizationMode::Optimized);
        for (_, values) in flags.iter() {
            let mut sorted = values.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), values.len());
        }
    }

    #[test]
    fn prop_recommendation_score_bounded(profile in arb_profile()) {
        let rec = recommend_mode(&profile);
        prop_assert!(rec.score <= 100);
        prop_assert_eq!(rec.mode == OptimizationMode::Optimized, rec.score >= 50);
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// AVX2 present, AES-NI absent: AVX2 flags in, AES flags out.
#[test]
fn test_avx2_without_aesni() {
    let mut profile = HardwareProfile::baseline(CpuVendor::Intel);
    profile.isa.insert(IsaExtension::Avx);
    profile.isa.insert(IsaExtension::Avx2);

    let flags = PolicyEngine::default().build_flags(&profile, OptimizationMode::Optimized);

    assert!(flags.contains(FlagCategory::Compile, "-mavx2"));
    assert!(flags.contains(FlagCategory::Define, "VMW_HAVE_AVX2"));
    assert!(!flags.mentions("-maes"));
    assert!(!flags.mentions("VMW_HAVE_AES_NI"));
}

#[test]
fn test_errata_suppression_wins() {
    let mut profile = HardwareProfile::baseline(CpuVendor::Intel);
    profile.cpu.microarch = Microarch::SkylakeAvx512;
    profile.isa.insert(IsaExtension::Avx512f);
    profile.isa.insert(IsaExtension::Avx2);

    let engine = PolicyEngine::new(Errata::none().suppress(Microarch::SkylakeAvx512, IsaExtension::Avx512f));
    let decision = engine.decide(&profile, OptimizationMode::Optimized);

    assert!(!decision.flags.mentions("-mavx512f"));
    assert!(decision.flags.mentions("-mavx2"));
    assert!(decision.rationale.iter().any(|r| r.contains("AVX512F omitted")));
}

#[test]
fn test_vanilla_baseline_flags() {
    let profile = HardwareProfile::baseline(CpuVendor::Amd);
    let flags = PolicyEngine::default().build_flags(&profile, OptimizationMode::Vanilla);
    assert_eq!(flags.get(FlagCategory::Compile), &["-O2", "-pipe"]);
    assert!(flags.get(FlagCategory::Link).is_empty());
    assert!(flags.contains(FlagCategory::Define, "VMW_BUILD_VANILLA"));
}

#[test]
fn test_bare_profile_recommends_vanilla() {
    let profile = HardwareProfile::baseline(CpuVendor::Unknown);
    let rec = recommend_mode(&profile);
    assert_eq!(rec.mode, OptimizationMode::Vanilla);
}
