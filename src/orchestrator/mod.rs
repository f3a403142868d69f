//! Run orchestration: one plan per selected kernel, strictly sequential.
//!
//! Per target: cancellation check -> assemble (resolve, policy, integrity
//! gate) -> external build -> commit. A failing target is recorded in the
//! [`RunReport`] and the run moves on to the next one.
//!
//! Workspaces committed by a run stay on disk until the next run starts.

pub mod export;
pub mod plan;

pub use export::{PlanBuilder, PlanExporter};
pub use plan::{PendingPlan, PlanAssembler};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;

use crate::error::FailureKind;
use crate::integrity::IntegrityManager;
use crate::kernel::CompatTable;
use crate::models::{BuildPlan, HardwareProfile, KernelTarget, OptimizationMode};
use crate::policy::PolicyEngine;

/// A target that produced no plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub release: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub plans: Vec<BuildPlan>,
    pub failures: Vec<TargetFailure>,
    /// Releases whose patch set came from a nearest-version fallback.
    pub best_effort: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// 0 when every target produced a plan, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    fn fail(&mut self, release: &str, kind: FailureKind, message: String) {
        log::error!("[Orchestrator] {} failed ({}): {}", release, kind, message);
        self.failures.push(TargetFailure {
            release: release.to_string(),
            kind,
            message,
        });
    }
}

/// Drives plan assembly and hand-off for a list of kernel targets.
pub struct Orchestrator {
    table: CompatTable,
    policy: PolicyEngine,
    integrity: IntegrityManager,
    profile: HardwareProfile,
    modules: Vec<String>,
    source_tree: PathBuf,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(
        table: CompatTable,
        policy: PolicyEngine,
        integrity: IntegrityManager,
        profile: HardwareProfile,
        modules: Vec<String>,
        source_tree: impl Into<PathBuf>,
    ) -> Self {
        Orchestrator {
            table,
            policy,
            integrity,
            profile,
            modules,
            source_tree: source_tree.into(),
            cancel_rx: None,
        }
    }

    /// Stop the run once `true` is observed on `cancel_rx`.
    pub fn with_cancellation(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn integrity(&self) -> &IntegrityManager {
        &self.integrity
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Process `targets` in order.
    pub fn run(
        &mut self,
        targets: &[KernelTarget],
        mode: OptimizationMode,
        builder: &mut dyn PlanBuilder,
    ) -> RunReport {
        let mut report = RunReport::default();
        let mut pinned = Vec::new();

        log::info!(
            "[Orchestrator] Starting {} run for {} target(s)",
            mode,
            targets.len()
        );

        if let Err(e) = self.integrity.sweep_workspaces() {
            log::warn!("[Orchestrator] Could not reclaim previous workspaces: {}", e);
        }

        for (index, target) in targets.iter().enumerate() {
            if self.is_cancelled() {
                self.cancel_remaining(&mut report, &targets[index..]);
                break;
            }

            log::info!("[Orchestrator] Target {}/{}: {}", index + 1, targets.len(), target.release);

            let assembled = PlanAssembler::new(
                &self.table,
                &self.policy,
                &mut self.integrity,
                &self.modules,
                &self.source_tree,
            )
            .assemble(target, &self.profile, mode);

            let pending = match assembled {
                Ok(pending) => pending,
                Err(e) => {
                    report.fail(&target.release, e.kind(), e.to_string());
                    continue;
                }
            };
            pinned.push(pending.plan().source.backup_id);

            if pending.plan().patches.best_effort {
                log::warn!(
                    "[Orchestrator] {}: no exact compatibility entry, using series {} (best effort)",
                    target.release,
                    pending.plan().patches.matched_series
                );
                report.best_effort.push(target.release.clone());
            }

            builder.on_assembled(pending.plan());

            // workspace of the in-progress target is dropped with `pending`
            if self.is_cancelled() {
                drop(pending);
                self.cancel_remaining(&mut report, &targets[index..]);
                break;
            }

            if let Err(e) = builder.build(pending.plan()) {
                report.fail(&target.release, FailureKind::Build, e.to_string());
                continue;
            }

            report.plans.push(pending.commit());
        }

        for id in pinned {
            self.integrity.unpin(id);
        }

        log::info!(
            "[Orchestrator] Run finished: {} plan(s), {} failure(s)",
            report.plans.len(),
            report.failures.len()
        );
        report
    }

    fn cancel_remaining(&self, report: &mut RunReport, remaining: &[KernelTarget]) {
        log::warn!(
            "[Orchestrator] Run cancelled, {} target(s) not processed",
            remaining.len()
        );
        report.cancelled = true;
        for target in remaining {
            report.failures.push(TargetFailure {
                release: target.release.clone(),
                kind: FailureKind::Cancelled,
                message: "run cancelled before completion".to_string(),
            });
        }
    }
}
