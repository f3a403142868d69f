//! vmod-forge
//!
//! Decides, per host, how the `vmmon`/`vmnet` hypervisor host modules are
//! rebuilt for each selected kernel: which source-compatibility patches apply,
//! which compiler flags exploit the host, and how the last known-good module
//! sources survive a failed rebuild. Compilation itself is left to an external
//! builder that consumes the exported [`BuildPlan`]s.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy and failure taxonomy
//! - **models**: Core data structures and types
//! - **hardware**: Read-only host capability probe
//! - **kernel**: Kernel versions, compatibility table, patch resolution, discovery
//! - **policy**: Optimization policy engine (ordered rule table)
//! - **integrity**: Content-addressed backup store and clean-copy verification
//! - **orchestrator**: Per-target plan assembly and hand-off to the builder
//! - **config**: Runtime configuration
//! - **log_collector**: Background log writer wired into the `log` facade

pub mod error;
pub mod models;

pub mod hardware;
pub mod kernel;
pub mod policy;

pub mod integrity;
pub mod orchestrator;

pub mod config;

pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    BuildError, ConfigError, FailureKind, IntegrityError, PlanError, ProbeError, ResolveError,
};

pub use models::{
    BackupRecord, BuildPlan, FlagCategory, FlagSet, HardwareProfile, IsaExtension, KernelTarget,
    OptimizationMode, PatchSet,
};

pub use config::AppConfig;
pub use hardware::HardwareProbe;
pub use integrity::{CleanCopy, IntegrityManager};
pub use kernel::{resolve_patches, CompatTable, KernelVersion};
pub use orchestrator::{Orchestrator, PlanBuilder, PlanExporter, RunReport, TargetFailure};
pub use policy::{Errata, PolicyEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
