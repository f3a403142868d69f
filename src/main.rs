mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tokio::sync::watch;

use cli::{Cli, Commands};
use vmod_forge::config::AppConfig;
use vmod_forge::hardware::HardwareProbe;
use vmod_forge::integrity::IntegrityManager;
use vmod_forge::kernel::{discover_kernels, running_release, InstalledKernel};
use vmod_forge::models::KernelTarget;
use vmod_forge::orchestrator::{Orchestrator, PlanExporter};
use vmod_forge::policy::{recommend_mode, PolicyEngine};
use vmod_forge::LogCollector;

/// Exit status for run-fatal errors (probe failure, bad configuration).
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli).await;
    log::logger().flush();

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.sys_root = root;
    }

    init_logging(&config, cli.verbose);
    log::info!("[Main] vmod-forge {} starting", vmod_forge::VERSION);

    match cli.command {
        Commands::Probe { json } => cmd_probe(&config, json),
        Commands::Kernels => cmd_kernels(&config),
        Commands::Plan {
            kernels,
            all,
            mode,
            output,
        } => {
            let mode = mode.unwrap_or(config.default_mode);
            let plan_dir = output.unwrap_or_else(|| config.plan_dir.clone());
            cmd_plan(config, kernels, all, mode, plan_dir).await
        }
        Commands::Backups => cmd_backups(&config),
        Commands::Restore { id, original } => cmd_restore(&config, id, original),
    }
}

fn init_logging(config: &AppConfig, verbose: u8) {
    let stderr_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    match LogCollector::new(&config.log_dir, log::LevelFilter::Debug) {
        Ok(collector) => {
            let collector = collector.with_stderr_level(stderr_level);
            if let Err(e) = collector.install() {
                eprintln!("[Main] WARNING: Failed to register logger: {}", e);
            }
        }
        Err(e) => eprintln!(
            "[Main] WARNING: Logging to {} unavailable: {}",
            config.log_dir.display(),
            e
        ),
    }
}

fn probe(config: &AppConfig) -> Result<vmod_forge::models::HardwareProfile> {
    HardwareProbe::new(&config.sys_root)
        .probe()
        .context("Hardware probe failed; no safe build plan can be derived")
}

fn cmd_probe(config: &AppConfig, json: bool) -> Result<u8> {
    let profile = probe(config)?;
    let recommendation = recommend_mode(&profile);

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(0);
    }

    println!("CPU:            {} ({:?}, {:?})", profile.cpu.model_name, profile.cpu.vendor, profile.cpu.microarch);
    let isa: Vec<&str> = profile.isa.iter().map(|e| e.label()).collect();
    println!("Extensions:     {}", if isa.is_empty() { "-".to_string() } else { isa.join(" ") });
    println!(
        "Virtualization: hw={} ept={} vpid={} vmfunc={} posted-int={}",
        profile.virt.hw_virt,
        profile.virt.ept,
        profile.virt.vpid,
        profile.virt.vmfunc,
        profile.virt.posted_interrupts
    );
    match profile.storage {
        Some(storage) => match storage.link {
            Some(link) => println!("Storage:        {:?} (PCIe gen{} x{})", storage.class, link.generation, link.lanes),
            None => println!("Storage:        {:?}", storage.class),
        },
        None => println!("Storage:        unknown"),
    }
    println!(
        "Memory:         {} MiB, NUMA nodes {}, huge pages {}",
        opt(profile.memory.total_mib),
        opt(profile.memory.numa_nodes),
        opt(profile.memory.huge_pages)
    );
    match &profile.gpu {
        Some(gpu) => println!("GPU:            {:?} ({} MiB VRAM)", gpu.vendor, opt(gpu.vram_mib)),
        None => println!("GPU:            none"),
    }
    println!(
        "Recommended:    {} (score {}/100)",
        recommendation.mode, recommendation.score
    );
    Ok(0)
}

fn cmd_kernels(config: &AppConfig) -> Result<u8> {
    let table = config.compat_table()?;
    let kernels = discover_kernels(&config.sys_root, &table);
    if kernels.is_empty() {
        println!("No kernels found under {}", config.sys_root.join("lib/modules").display());
        return Ok(0);
    }

    for kernel in &kernels {
        println!(
            "{:<32} {:<8} headers:{:<4} {}",
            kernel.target.release,
            if kernel.target.is_running { "running" } else { "" },
            if kernel.headers_installed { "yes" } else { "no" },
            if kernel.supported { "supported" } else { "unsupported" }
        );
    }
    Ok(0)
}

fn select_targets(
    config: &AppConfig,
    installed: &[InstalledKernel],
    releases: Vec<String>,
    all: bool,
) -> Result<Vec<KernelTarget>> {
    let running = running_release(&config.sys_root);

    if all {
        let targets: Vec<KernelTarget> = installed
            .iter()
            .filter(|k| k.headers_installed)
            .filter(|k| k.supported || !config.supported_only)
            .map(|k| k.target.clone())
            .collect();
        if targets.is_empty() {
            bail!("No installed kernel with headers is eligible for a rebuild");
        }
        return Ok(targets);
    }

    let releases = if releases.is_empty() {
        vec![running.clone().context("Cannot determine the running kernel; pass --kernel")?]
    } else {
        releases
    };

    releases
        .iter()
        .map(|release| {
            let is_running = running.as_deref() == Some(release.as_str());
            KernelTarget::parse(release, is_running)
                .with_context(|| format!("Invalid kernel release {:?}", release))
        })
        .collect()
}

async fn cmd_plan(
    config: AppConfig,
    releases: Vec<String>,
    all: bool,
    mode: vmod_forge::models::OptimizationMode,
    plan_dir: std::path::PathBuf,
) -> Result<u8> {
    let profile = probe(&config)?;
    let table = config.compat_table()?;
    let installed = discover_kernels(&config.sys_root, &table);
    let targets = select_targets(&config, &installed, releases, all)?;

    let integrity = IntegrityManager::open(&config.backup_dir, config.retention)
        .with_context(|| format!("Failed to open backup store {}", config.backup_dir.display()))?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[Main] Interrupt received, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });

    let mut orchestrator = Orchestrator::new(
        table,
        PolicyEngine::new(config.errata.clone()),
        integrity,
        profile,
        config.modules.clone(),
        config.module_source_dir.clone(),
    )
    .with_cancellation(cancel_rx);

    let report = tokio::task::spawn_blocking(move || {
        let mut exporter = PlanExporter::new(plan_dir);
        orchestrator.run(&targets, mode, &mut exporter)
    })
    .await
    .context("Orchestrator task panicked")?;

    for plan in &report.plans {
        println!(
            "ok     {:<28} {} patch(es), {} source {}",
            plan.target.release,
            plan.patches.len(),
            plan.mode,
            plan.source.location.display()
        );
    }
    for release in &report.best_effort {
        println!("warn   {:<28} best-effort compatibility resolution", release);
    }
    for failure in &report.failures {
        println!("FAILED {:<28} {}: {}", failure.release, failure.kind, failure.message);
    }

    Ok(report.exit_code() as u8)
}

fn cmd_backups(config: &AppConfig) -> Result<u8> {
    let integrity = IntegrityManager::open(&config.backup_dir, config.retention)?;
    if integrity.records().is_empty() {
        println!("No backups in {}", config.backup_dir.display());
        return Ok(0);
    }

    for record in integrity.records() {
        println!(
            "#{:<4} {}  {}  {:>5} files{}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            &record.hash[..record.hash.len().min(16)],
            record.file_count,
            if record.is_original { "  (original)" } else { "" }
        );
    }
    Ok(0)
}

fn cmd_restore(config: &AppConfig, id: Option<u64>, original: bool) -> Result<u8> {
    let integrity = IntegrityManager::open(&config.backup_dir, config.retention)?;

    let record = if original {
        integrity.original().context("No original backup exists")?
    } else if let Some(id) = id {
        integrity
            .find(id)
            .ok_or(vmod_forge::error::IntegrityError::RecordNotFound(id))?
    } else {
        integrity.latest().context("No backups exist")?
    };

    integrity
        .restore(record, &config.module_source_dir)
        .with_context(|| format!("Failed to restore backup #{}", record.id))?;
    println!(
        "Restored backup #{} to {}",
        record.id,
        config.module_source_dir.display()
    );
    Ok(0)
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}
