//! Hand-off of finished plans to the external builder.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::models::BuildPlan;

/// Seam to the external module builder.
///
/// Called once per target with a plan whose clean source has been verified.
/// Returning an error marks the target failed and discards its workspace.
pub trait PlanBuilder {
    /// Status notification once a plan is assembled, before the run checks
    /// for cancellation and calls [`PlanBuilder::build`].
    fn on_assembled(&mut self, _plan: &BuildPlan) {}

    fn build(&mut self, plan: &BuildPlan) -> Result<(), BuildError>;
}

/// Writes each plan as pretty JSON to `<dir>/<release>.json`.
#[derive(Debug)]
pub struct PlanExporter {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl PlanExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PlanExporter {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, in target order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn plan_path(&self, release: &str) -> PathBuf {
        let name: String = release
            .chars()
            .map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl PlanBuilder for PlanExporter {
    fn on_assembled(&mut self, plan: &BuildPlan) {
        log::debug!(
            "[Export] Plan for {} assembled, workspace {}",
            plan.target.release,
            plan.source.location.display()
        );
    }

    fn build(&mut self, plan: &BuildPlan) -> Result<(), BuildError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(plan)?;
        let path = self.plan_path(&plan.target.release);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| BuildError::IoError(e.error))?;

        log::info!("[Export] Wrote plan for {} to {}", plan.target.release, path.display());
        self.written.push(path);
        Ok(())
    }
}
