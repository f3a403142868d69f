//! Kernel version -> ordered patch set resolution.

use crate::error::ResolveError;
use crate::kernel::compat::CompatTable;
use crate::kernel::version::KernelVersion;
use crate::models::PatchSet;

/// Resolve the patches required to build the host modules against `version`.
///
/// An exact series match returns that series' patches. Otherwise the nearest
/// older series is used and the result is tagged best-effort; newer series are
/// never borrowed from. Patches whose `min_kernel` is above `version` are left
/// out, order is otherwise preserved.
pub fn resolve_patches(
    table: &CompatTable,
    version: &KernelVersion,
) -> Result<PatchSet, ResolveError> {
    let wanted = version.series();

    let (entry, best_effort) = match table.entry(wanted) {
        Some(entry) => (entry, false),
        None => {
            let below = table.nearest_below(wanted).ok_or_else(|| {
                unsupported(version, "older than every series in the compatibility table")
            })?;

            if below.series.major != wanted.major {
                return Err(unsupported(
                    version,
                    &format!("no series for major version {}", wanted.major),
                ));
            }

            let gap = wanted.minor - below.series.minor;
            if gap > table.best_effort_max_gap() {
                return Err(unsupported(
                    version,
                    &format!(
                        "{} minor releases past {}, fallback limit is {}",
                        gap,
                        below.series,
                        table.best_effort_max_gap()
                    ),
                ));
            }

            (below, true)
        }
    };

    let patches: Vec<_> = entry
        .patches
        .iter()
        .filter_map(|id| table.patch(id))
        .filter(|p| p.applicability.min_kernel <= *version)
        .cloned()
        .collect();

    if patches.is_empty() {
        return Err(unsupported(
            version,
            &format!("no patch in series {} applies yet", entry.series),
        ));
    }

    Ok(PatchSet {
        patches,
        best_effort,
        matched_series: entry.series.to_string(),
        table_revision: table.revision(),
    })
}

/// Whether `version` resolves at all, exactly or best-effort.
pub fn is_supported(table: &CompatTable, version: &KernelVersion) -> bool {
    resolve_patches(table, version).is_ok()
}

fn unsupported(version: &KernelVersion, reason: &str) -> ResolveError {
    ResolveError::UnsupportedKernel {
        version: version.to_string(),
        reason: reason.to_string(),
    }
}
