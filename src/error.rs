//! Unified error type hierarchy for vmod_forge
//!
//! Provides structured error handling with ProbeError, ResolveError, IntegrityError,
//! PlanError, BuildError and ConfigError, plus the FailureKind taxonomy used when
//! reporting per-target failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Hardware probe errors. Only total CPU information loss is fatal.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("CPU information unavailable: {0}")]
    CpuInfoUnavailable(String),

    #[error("IO error during hardware probe: {0}")]
    IoError(#[from] io::Error),
}

/// Kernel compatibility resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unsupported kernel {version}: {reason}")]
    UnsupportedKernel { version: String, reason: String },

    #[error("Invalid kernel version: {0}")]
    InvalidVersion(String),

    #[error("Compatibility table invalid: {0}")]
    InvalidTable(String),
}

/// Backup store and clean-copy integrity errors.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Integrity verification failed for {location}: expected {expected}, found {actual}")]
    VerificationFailed {
        location: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Module source tree not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Backup record {0} not found")]
    RecordNotFound(u64),

    #[error("Backup index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Unsupported file type in source tree: {0}")]
    UnsupportedEntry(PathBuf),

    #[error("Not a workspace of this backup store: {0}")]
    NotAWorkspace(PathBuf),

    #[error("IO error during integrity operation: {0}")]
    IoError(#[from] io::Error),
}

/// Build plan assembly errors.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Plan assembly failed: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Run cancelled by operator")]
    Cancelled,
}

impl PlanError {
    /// Taxonomy kind used in the per-target report.
    pub fn kind(&self) -> FailureKind {
        match self {
            PlanError::Resolve(_) => FailureKind::UnsupportedKernel,
            PlanError::Integrity(IntegrityError::VerificationFailed { .. }) => {
                FailureKind::IntegrityVerification
            }
            PlanError::Integrity(_) => FailureKind::PlanAssembly,
            PlanError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Errors raised by the external builder seam.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Builder rejected plan: {0}")]
    Rejected(String),

    #[error("Plan serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error while handing off plan: {0}")]
    IoError(#[from] io::Error),
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Per-target failure taxonomy reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedKernel,
    IntegrityVerification,
    PlanAssembly,
    Build,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::UnsupportedKernel => "UnsupportedKernelError",
            FailureKind::IntegrityVerification => "IntegrityVerificationError",
            FailureKind::PlanAssembly => "PlanAssemblyError",
            FailureKind::Build => "BuildError",
            FailureKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}
