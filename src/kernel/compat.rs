//! Static kernel compatibility table.
//!
//! The table is data, not code: the built-in copy is a TOML file embedded at
//! compile time, and a replacement can be loaded from disk. Resolver logic in
//! [`crate::kernel::resolver`] never hard-codes kernel knowledge.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{ConfigError, ResolveError};
use crate::kernel::version::{KernelSeries, KernelVersion};
use crate::models::{Applicability, PatchEntry, ToolchainConstraint};

const BUILTIN_TABLE: &str = include_str!("compat_table.toml");

#[derive(Debug, Deserialize)]
struct RawTable {
    revision: u32,
    #[serde(default)]
    best_effort_max_gap: u32,
    #[serde(default)]
    patch: Vec<RawPatch>,
    #[serde(default)]
    series: Vec<RawSeries>,
}

#[derive(Debug, Deserialize)]
struct RawPatch {
    id: String,
    min_kernel: KernelVersion,
    #[serde(default)]
    toolchain: Option<ToolchainConstraint>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    kernel: KernelSeries,
    patches: Vec<String>,
}

/// Ordered patch list for one kernel series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesEntry {
    pub series: KernelSeries,
    pub patches: Vec<String>,
}

/// Validated compatibility table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatTable {
    revision: u32,
    best_effort_max_gap: u32,
    catalog: BTreeMap<String, PatchEntry>,
    series: Vec<SeriesEntry>,
}

impl CompatTable {
    /// The table shipped with this build.
    pub fn builtin() -> Result<Self, ResolveError> {
        Self::from_toml_str(BUILTIN_TABLE)
    }

    /// Load a replacement table from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::IoError(e)
            }
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| ConfigError::ValidationFailed(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate a table.
    pub fn from_toml_str(content: &str) -> Result<Self, ResolveError> {
        let raw: RawTable =
            toml::from_str(content).map_err(|e| ResolveError::InvalidTable(e.to_string()))?;

        let mut catalog = BTreeMap::new();
        for patch in raw.patch {
            if catalog.contains_key(&patch.id) {
                return Err(ResolveError::InvalidTable(format!(
                    "patch '{}' defined twice",
                    patch.id
                )));
            }
            catalog.insert(
                patch.id.clone(),
                PatchEntry {
                    id: patch.id,
                    applicability: Applicability {
                        min_kernel: patch.min_kernel,
                        toolchain: patch.toolchain,
                    },
                    description: patch.description,
                },
            );
        }

        let mut series: Vec<SeriesEntry> = Vec::with_capacity(raw.series.len());
        for entry in raw.series {
            if let Some(prev) = series.last() {
                if prev.series >= entry.kernel {
                    return Err(ResolveError::InvalidTable(format!(
                        "series {} listed after {}; entries must be strictly ascending",
                        entry.kernel, prev.series
                    )));
                }
            }

            let mut seen = HashSet::new();
            for id in &entry.patches {
                if !catalog.contains_key(id) {
                    return Err(ResolveError::InvalidTable(format!(
                        "series {} references unknown patch '{}'",
                        entry.kernel, id
                    )));
                }
                if !seen.insert(id.as_str()) {
                    return Err(ResolveError::InvalidTable(format!(
                        "series {} lists patch '{}' twice",
                        entry.kernel, id
                    )));
                }
            }

            series.push(SeriesEntry {
                series: entry.kernel,
                patches: entry.patches,
            });
        }

        Ok(CompatTable {
            revision: raw.revision,
            best_effort_max_gap: raw.best_effort_max_gap,
            catalog,
            series,
        })
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn best_effort_max_gap(&self) -> u32 {
        self.best_effort_max_gap
    }

    pub fn series(&self) -> &[SeriesEntry] {
        &self.series
    }

    pub fn patch(&self, id: &str) -> Option<&PatchEntry> {
        self.catalog.get(id)
    }

    /// Exact series entry.
    pub fn entry(&self, series: KernelSeries) -> Option<&SeriesEntry> {
        self.series.iter().find(|e| e.series == series)
    }

    /// Newest series strictly older than `series`.
    pub fn nearest_below(&self, series: KernelSeries) -> Option<&SeriesEntry> {
        self.series.iter().rev().find(|e| e.series < series)
    }

    /// Whether a series is listed verbatim (no best-effort fallback needed).
    pub fn is_exact(&self, version: &KernelVersion) -> bool {
        self.entry(version.series()).is_some()
    }
}
