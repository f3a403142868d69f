//! Kernel compatibility module
//!
//! Handles everything that depends on the target kernel:
//! - Version parsing and ordering
//! - The static compatibility table (patch catalog + per-series patch lists)
//! - Patch set resolution, including best-effort fallback
//! - Installed kernel discovery

pub mod compat;
pub mod discovery;
pub mod resolver;
pub mod version;

pub use compat::CompatTable;
pub use discovery::{discover_kernels, running_release, InstalledKernel};
pub use resolver::{is_supported, resolve_patches};
pub use version::{KernelSeries, KernelVersion};
