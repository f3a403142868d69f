//! Build plan assembly: resolver + policy + integrity gate for one target.

use std::path::Path;

use crate::error::PlanError;
use crate::integrity::{CleanCopy, IntegrityManager};
use crate::kernel::{resolve_patches, CompatTable};
use crate::models::{BuildPlan, HardwareProfile, KernelTarget, OptimizationMode, VerifiedSource};
use crate::policy::{wants_iommu, PolicyEngine};

/// A fully assembled plan whose clean-copy workspace is still owned by the
/// assembler. Dropping it discards the workspace.
#[derive(Debug)]
pub struct PendingPlan {
    plan: BuildPlan,
    workspace: CleanCopy,
}

impl PendingPlan {
    pub fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Release the plan; the workspace now belongs to the builder.
    pub fn commit(self) -> BuildPlan {
        self.workspace.keep();
        self.plan
    }
}

/// Assembles plans for one run.
pub struct PlanAssembler<'a> {
    table: &'a CompatTable,
    policy: &'a PolicyEngine,
    integrity: &'a mut IntegrityManager,
    modules: &'a [String],
    source_tree: &'a Path,
}

impl<'a> PlanAssembler<'a> {
    pub fn new(
        table: &'a CompatTable,
        policy: &'a PolicyEngine,
        integrity: &'a mut IntegrityManager,
        modules: &'a [String],
        source_tree: &'a Path,
    ) -> Self {
        PlanAssembler {
            table,
            policy,
            integrity,
            modules,
            source_tree,
        }
    }

    /// Resolve, decide flags, back up the live sources and extract a verified
    /// clean copy for `target`.
    ///
    /// Nothing is written to the backup store when the kernel is unsupported.
    pub fn assemble(
        &mut self,
        target: &KernelTarget,
        profile: &HardwareProfile,
        mode: OptimizationMode,
    ) -> Result<PendingPlan, PlanError> {
        let patches = resolve_patches(self.table, &target.version)?;
        log::debug!(
            "[Plan] {}: {} patch(es) from series {}",
            target.release,
            patches.len(),
            patches.matched_series
        );

        let decision = self.policy.decide(profile, mode);

        let record = self.integrity.ensure_backup(self.source_tree)?;
        let workspace = self.integrity.extract_clean_copy(&record, &target.release)?;
        self.integrity.verify(workspace.path(), &record)?;
        self.integrity.pin(record.id);

        let plan = BuildPlan {
            target: target.clone(),
            mode,
            patches,
            flags: decision.flags,
            rationale: decision.rationale,
            modules: self.modules.to_vec(),
            source: VerifiedSource {
                location: workspace.path().to_path_buf(),
                backup_id: record.id,
                hash: record.hash.clone(),
            },
            configure_iommu: wants_iommu(profile, mode),
        };

        Ok(PendingPlan { plan, workspace })
    }
}
