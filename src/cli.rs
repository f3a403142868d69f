//! CLI definitions for vmod-forge
//!
//! The command implementations live in `main.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vmod_forge::models::OptimizationMode;

#[derive(Parser)]
#[command(name = "vmod-forge")]
#[command(version)]
#[command(about = "Plan hardware-aware, integrity-checked rebuilds of the vmmon/vmnet host modules", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.config/vmod-forge/config.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Read /proc, /sys and /lib/modules below this directory
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Echo more log output to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the detected hardware profile and the recommended build mode
    Probe {
        /// Print the profile as JSON
        #[arg(long)]
        json: bool,
    },

    /// List installed kernels and whether they can be rebuilt
    Kernels,

    /// Assemble and export build plans
    Plan {
        /// Kernel release to plan for; repeatable (default: running kernel)
        #[arg(short, long = "kernel")]
        kernels: Vec<String>,

        /// Plan for every installed kernel with headers
        #[arg(long, conflicts_with = "kernels")]
        all: bool,

        /// optimized or vanilla (default: from config)
        #[arg(short, long)]
        mode: Option<OptimizationMode>,

        /// Write plans here instead of the configured plan_dir
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List backups of the module sources
    Backups,

    /// Restore the module sources from a backup
    Restore {
        /// Backup id (see `backups`)
        #[arg(long, conflicts_with = "original")]
        id: Option<u64>,

        /// Restore the original, pre-patch sources
        #[arg(long)]
        original: bool,
    },
}
