//! Orchestrator integration tests.
//!
//! - Partial failure: one unsupported target does not block the next
//! - Integrity failures refuse the build
//! - Builder rejection and cancellation discard workspaces
//! - Workspaces from earlier runs are reclaimed
//! - Plan export to disk

use std::fs;
use std::path::Path;

use tokio::sync::watch;
use vmod_forge::error::BuildError;
use vmod_forge::integrity::{hash_tree, IntegrityManager};
use vmod_forge::kernel::CompatTable;
use vmod_forge::models::{BuildPlan, CpuVendor, HardwareProfile, IsaExtension, KernelTarget, OptimizationMode};
use vmod_forge::orchestrator::{Orchestrator, PlanBuilder, PlanExporter};
use vmod_forge::policy::PolicyEngine;
use vmod_forge::FailureKind;

const RECENT_ONLY_TABLE: &str = r#"
revision = 2
best_effort_max_gap = 1

[[patch]]
id = "timer-container-of"
min_kernel = "6.16.0"

[[patch]]
id = "vmnet-skb-frag-api"
min_kernel = "6.17.0"

[[patch]]
id = "vmnet-netdev-lock"
min_kernel = "6.18.0"

[[series]]
kernel = "6.17"
patches = ["timer-container-of", "vmnet-skb-frag-api"]

[[series]]
kernel = "6.18"
patches = ["timer-container-of", "vmnet-skb-frag-api", "vmnet-netdev-lock"]
"#;

/// Records every plan it is handed; optionally cancels the run after the
/// first build, or as soon as the first plan is assembled.
struct RecordingBuilder {
    built: Vec<String>,
    assembled: Vec<String>,
    cancel_after_first: Option<watch::Sender<bool>>,
    cancel_on_assembled: Option<watch::Sender<bool>>,
}

impl RecordingBuilder {
    fn new() -> Self {
        RecordingBuilder {
            built: Vec::new(),
            assembled: Vec::new(),
            cancel_after_first: None,
            cancel_on_assembled: None,
        }
    }
}

impl PlanBuilder for RecordingBuilder {
    fn on_assembled(&mut self, plan: &BuildPlan) {
        assert!(plan.source.location.is_dir());
        self.assembled.push(plan.target.release.clone());
        if let Some(tx) = self.cancel_on_assembled.take() {
            tx.send(true).unwrap();
        }
    }

    fn build(&mut self, plan: &BuildPlan) -> Result<(), BuildError> {
        assert!(plan.source.location.is_dir(), "builder handed a missing workspace");
        self.built.push(plan.target.release.clone());
        if let Some(tx) = self.cancel_after_first.take() {
            tx.send(true).unwrap();
        }
        Ok(())
    }
}

struct RejectingBuilder;

impl PlanBuilder for RejectingBuilder {
    fn build(&mut self, _plan: &BuildPlan) -> Result<(), BuildError> {
        Err(BuildError::Rejected("compiler missing".to_string()))
    }
}

fn module_sources(dir: &Path) {
    fs::create_dir_all(dir.join("vmmon-only")).unwrap();
    fs::create_dir_all(dir.join("vmnet-only")).unwrap();
    fs::write(dir.join("vmmon-only/driver.c"), "/* vmmon */\n").unwrap();
    fs::write(dir.join("vmnet-only/driver.c"), "/* vmnet */\n").unwrap();
}

fn profile() -> HardwareProfile {
    let mut profile = HardwareProfile::baseline(CpuVendor::Intel);
    profile.isa.insert(IsaExtension::Avx2);
    profile.virt.hw_virt = true;
    profile
}

fn orchestrator(table: CompatTable, src: &Path, store: &Path) -> Orchestrator {
    Orchestrator::new(
        table,
        PolicyEngine::default(),
        IntegrityManager::open(store, 2).unwrap(),
        profile(),
        vec!["vmmon".to_string(), "vmnet".to_string()],
        src,
    )
}

fn targets(releases: &[&str]) -> Vec<KernelTarget> {
    releases
        .iter()
        .map(|r| KernelTarget::parse(r, false).unwrap())
        .collect()
}

fn work_entries(store: &Path) -> usize {
    fs::read_dir(store.join("work")).unwrap().count()
}

// ============================================================================
// PARTIAL FAILURE
// ============================================================================

/// First target unsupported, second still planned.
#[test]
fn test_unsupported_target_does_not_block_next() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    module_sources(src.path());

    let table = CompatTable::from_toml_str(RECENT_ONLY_TABLE).unwrap();
    let mut orch = orchestrator(table, src.path(), store.path());
    let mut builder = RecordingBuilder::new();

    let report = orch.run(&targets(&["6.16.9", "6.18.1"]), OptimizationMode::Optimized, &mut builder);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].release, "6.16.9");
    assert_eq!(report.failures[0].kind, FailureKind::UnsupportedKernel);

    assert_eq!(report.plans.len(), 1);
    let plan = &report.plans[0];
    assert_eq!(plan.target.release, "6.18.1");
    assert_eq!(
        plan.patches.ids(),
        vec!["timer-container-of", "vmnet-skb-frag-api", "vmnet-netdev-lock"]
    );
    assert!(plan.flags.mentions("-mavx2"));
    assert!(plan.configure_iommu);
    assert!(plan.source.location.is_dir());

    assert_eq!(builder.built, vec!["6.18.1".to_string()]);
    assert_eq!(report.exit_code(), 1);
}

/// Two supported targets share one backup and get separate workspaces.
#[test]
fn test_all_targets_planned() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    module_sources(src.path());

    let mut orch = orchestrator(CompatTable::builtin().unwrap(), src.path(), store.path());
    let mut builder = RecordingBuilder::new();
    let report = orch.run(&targets(&["6.17.2", "6.18.1"]), OptimizationMode::Vanilla, &mut builder);

    assert!(report.succeeded());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.plans.len(), 2);
    assert_eq!(report.plans[0].source.backup_id, report.plans[1].source.backup_id);
    assert_ne!(report.plans[0].source.location, report.plans[1].source.location);
    assert!(!report.plans[0].configure_iommu);
    assert_eq!(orch.integrity().records().len(), 1);
}

// ============================================================================
// INTEGRITY GATE
// ============================================================================

/// A damaged snapshot refuses the build; the builder never sees the plan.
#[test]
fn test_tampered_backup_refuses_build() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    module_sources(src.path());

    let mut orch = orchestrator(CompatTable::builtin().unwrap(), src.path(), store.path());
    let mut builder = RecordingBuilder::new();
    let first = orch.run(&targets(&["6.17.2"]), OptimizationMode::Optimized, &mut builder);
    assert!(first.succeeded());

    let snapshot = orch.integrity().records()[0].location.clone();
    fs::write(snapshot.join("vmnet-only/driver.c"), "/* tampered */\n").unwrap();

    let mut builder = RecordingBuilder::new();
    let second = orch.run(&targets(&["6.18.1"]), OptimizationMode::Optimized, &mut builder);

    assert_eq!(second.failures.len(), 1);
    assert_eq!(second.failures[0].kind, FailureKind::IntegrityVerification);
    assert!(builder.built.is_empty());
    // the first run's workspace was reclaimed, the refused one never kept
    assert_eq!(work_entries(store.path()), 0);
}

/// Missing live sources are a plan assembly failure.
#[test]
fn test_missing_sources_is_plan_assembly_failure() {
    let root = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let src = root.path().join("does-not-exist");

    let mut orch = orchestrator(CompatTable::builtin().unwrap(), &src, store.path());
    let report = orch.run(&targets(&["6.17.2"]), OptimizationMode::Optimized, &mut RecordingBuilder::new());

    assert_eq!(report.failures[0].kind, FailureKind::PlanAssembly);
}

// ============================================================================
// DISCARDED WORKSPACES
// ============================================================================

#[test]
fn test_rejected_build_discards_workspace() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    module_sources(src.path());

    let mut orch = orchestrator(CompatTable::builtin().unwrap(), src.path(), store.path());
    let report = orch.run(&targets(&["6.17.2"]), OptimizationMode::Optimized, &mut RejectingBuilder);

    assert_eq!(report.failures[0].kind, FailureKind::Build);
    assert!(report.failures[0].message.contains("compiler missing"));
    assert_eq!(work_entries(store.path()), 0);
}

/// Cancelling mid-run leaves finished plans, skips the rest and never
/// touches the live sources.
#[test]
fn test_cancellation_mid_run() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    module_sources(src.path());
    let before = hash_tree(src.path()).unwrap();

    let (tx, rx) = watch::channel(false);
    let mut orch =
        orchestrator(CompatTable::builtin().unwrap(), src.path(), store.path()).with_cancellation(rx);
    let mut builder = RecordingBuilder::new();
    builder.cancel_after_first = Some(tx);

    let report = orch.run(
        &targets(&["6.17.2", "6.18.1", "6.16.3"]),
        OptimizationMode::Optimized,
        &mut builder,
    );

    assert!(report.cancelled);
    assert_eq!(report.plans.len(), 1);
    assert_eq!(builder.built, vec!["6.17.2".to_string()]);
    let cancelled: Vec<&str> = report
        .failures
        .iter()
        .filter(|f| f.kind == FailureKind::Cancelled)
        .map(|f| f.release.as_str())
        .collect();
    assert_eq!(cancelled, vec!["6.18.1", "6.16.3"]);

    assert_eq!(work_entries(store.path()), 1);
    assert_eq!(hash_tree(src.path()).unwrap(), before);
    assert!(orch.integrity().original().is_some());
}

/// Cancellation arriving between assembly and build discards the
/// in-progress workspace and never reaches the builder.
#[test]
fn test_cancellation_after_assembly_discards_workspace() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    module_sources(src.path());

    let (tx, rx) = watch::channel(false);
    let mut orch =
        orchestrator(CompatTable::builtin().unwrap(), src.path(), store.path()).with_cancellation(rx);
    let mut builder = RecordingBuilder::new();
    builder.cancel_on_assembled = Some(tx);

    let report = orch.run(&targets(&["6.17.2", "6.18.1"]), OptimizationMode::Optimized, &mut builder);

    assert!(report.cancelled);
    assert!(report.plans.is_empty());
    assert_eq!(builder.assembled, vec!["6.17.2".to_string()]);
    assert!(builder.built.is_empty());
    let cancelled: Vec<&str> = report.failures.iter().map(|f| f.release.as_str()).collect();
    assert_eq!(cancelled, vec!["6.17.2", "6.18.1"]);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Cancelled));
    assert_eq!(work_entries(store.path()), 0);

    // the backup taken during assembly is kept
    assert_eq!(orch.integrity().records().len(), 1);
}

// ============================================================================
// WORKSPACE LIFECYCLE
// ============================================================================

/// Repeated runs on an unchanged tree keep only the latest run's workspaces.
#[test]
fn test_new_run_reclaims_previous_workspaces() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    module_sources(src.path());

    let mut orch = orchestrator(CompatTable::builtin().unwrap(), src.path(), store.path());
    let mut previous: Vec<std::path::PathBuf> = Vec::new();

    for _ in 0..4 {
        let report = orch.run(
            &targets(&["6.17.2", "6.18.1"]),
            OptimizationMode::Optimized,
            &mut RecordingBuilder::new(),
        );
        assert!(report.succeeded());
        assert_eq!(work_entries(store.path()), 2);

        for old in &previous {
            assert!(!old.exists(), "stale workspace {} kept", old.display());
        }
        previous = report.plans.iter().map(|p| p.source.location.clone()).collect();
        assert!(previous.iter().all(|p| p.is_dir()));
    }
    assert_eq!(orch.integrity().records().len(), 1);
}

// ============================================================================
// EXPORT
// ============================================================================

#[test]
fn test_exported_plans_round_trip() {
    let src = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let plans = tempfile::tempdir().unwrap();
    module_sources(src.path());

    let mut orch = orchestrator(CompatTable::builtin().unwrap(), src.path(), store.path());
    let mut exporter = PlanExporter::new(plans.path().join("out"));
    let report = orch.run(&targets(&["6.17.2-arch1-1"]), OptimizationMode::Optimized, &mut exporter);
    assert!(report.succeeded());

    assert_eq!(exporter.written().len(), 1);
    let path = plans.path().join("out/6.17.2-arch1-1.json");
    let parsed: BuildPlan = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed, report.plans[0]);
}
