//! Daemon lifecycle and manual scan commands

use crate::config::Config;
use crate::daemon::{
    spawn_detached, DaemonLifecycle, DaemonState, DaemonStatus, OcrReport, ScanProgress,
    ScanReport, Scheduler, ShutdownSignal, TickEvent,
};
use crate::error::{Result, SchedulerError};
use crate::progress::{finish_progress, start_progress_bar};
use crate::registry::{Registry, StatusCounts};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Resolves on SIGTERM or Ctrl-C
#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
            }
        }
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Shutdown signal wired to process termination
fn termination_signal() -> (ShutdownSignal, tokio::task::JoinHandle<()>) {
    let (trigger, shutdown) = ShutdownSignal::new();
    let task = tokio::spawn(async move {
        wait_for_termination().await;
        trigger.trigger();
    });
    (shutdown, task)
}

fn require_watch_dirs(config: &Config) -> Result<Vec<PathBuf>> {
    let dirs = config.watch_dirs()?;
    if dirs.is_empty() {
        return Err(SchedulerError::NoWatchDirectories.into());
    }
    Ok(dirs)
}

/// Run the daemon in the foreground until SIGTERM or Ctrl-C. Returns the
/// final counters.
pub async fn cmd_daemon(scheduler: Arc<Scheduler>) -> Result<DaemonState> {
    let config = scheduler.config();
    let dirs = require_watch_dirs(config)?;
    for dir in &dirs {
        if !dir.is_dir() {
            warn!("Watch directory {} does not exist yet", dir.display());
        }
    }

    let lifecycle = DaemonLifecycle::new(config);
    let guard = Arc::new(lifecycle.acquire_exclusive_run(dirs.clone())?);
    info!(
        pid = std::process::id(),
        dirs = dirs.len(),
        "Daemon watching {}",
        dirs.iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let (shutdown, signals) = termination_signal();
    let result = scheduler.run(guard.clone(), shutdown).await;
    signals.abort();

    let state = guard.state();
    result?;
    Ok(state)
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub pid: u32,
    pub log_file: PathBuf,
}

/// Start the daemon in the background
pub fn cmd_start_detached(config: &Config, config_file: Option<&Path>) -> Result<StartReport> {
    require_watch_dirs(config)?;
    let lifecycle = DaemonLifecycle::new(config);
    if let Some(state) = lifecycle.running() {
        return Err(SchedulerError::AlreadyRunning { pid: state.pid }.into());
    }

    let pid = spawn_detached(config_file, lifecycle.log_file())?;
    info!(pid, "Daemon started");
    Ok(StartReport {
        pid,
        log_file: lifecycle.log_file().to_path_buf(),
    })
}

pub fn print_start(report: &StartReport) {
    println!("✓ Daemon started (pid {})", report.pid);
    println!("  Log: {}", report.log_file.display());
}

/// Ask the running daemon to stop and wait for it
pub async fn cmd_stop(config: &Config) -> Result<DaemonState> {
    DaemonLifecycle::new(config).stop().await
}

pub fn print_stop(state: &DaemonState) {
    println!("✓ Daemon stopped (pid {})", state.pid);
}

/// Stop the running daemon, if any, and start a detached one
pub async fn cmd_restart(config: &Config, config_file: Option<&Path>) -> Result<StartReport> {
    require_watch_dirs(config)?;
    let lifecycle = DaemonLifecycle::new(config);
    let pid = lifecycle
        .restart(|log| spawn_detached(config_file, log))
        .await?;
    Ok(StartReport {
        pid,
        log_file: lifecycle.log_file().to_path_buf(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub config_file: PathBuf,
    pub watch_list: PathBuf,
    pub watch_dirs: Vec<PathBuf>,
    pub daemon: DaemonStatus,
    pub containers: StatusCounts,
}

/// Daemon state plus the OCR status of every container in the watch
/// directories
pub fn cmd_status(config: &Config) -> Result<StatusReport> {
    let watch_dirs = config.watch_dirs()?;
    let containers = Registry::scan(&watch_dirs).counts();
    Ok(StatusReport {
        config_file: config.paths.config_file.clone(),
        watch_list: config.watch_list_path(),
        watch_dirs,
        daemon: DaemonLifecycle::new(config).status(),
        containers,
    })
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub fn print_status(report: &StatusReport) {
    println!("veridock status");
    println!("===============");
    println!();
    println!("Config:     {}", report.config_file.display());
    println!("Watch list: {}", report.watch_list.display());
    for dir in &report.watch_dirs {
        println!("  {}", dir.display());
    }
    println!();

    let daemon = &report.daemon;
    match (&daemon.state, daemon.running) {
        (Some(state), true) => {
            println!("Daemon: running (pid {})", state.pid);
            println!("  Started:   {}", format_time(Some(state.started_at)));
            println!(
                "  Last scan: {} ({} ticks, {} converted, {} failed)",
                format_time(state.last_scan_tick),
                state.scan_ticks,
                state.converted,
                state.conversion_failures
            );
            println!(
                "  Last OCR:  {} ({} ticks, {} completed, {} failed)",
                format_time(state.last_ocr_tick),
                state.ocr_ticks,
                state.ocr_completed,
                state.ocr_failures
            );
        }
        _ if daemon.stale => println!(
            "Daemon: stopped (stale state file {})",
            daemon.state_file.display()
        ),
        _ => println!("Daemon: stopped"),
    }
    println!();

    let counts = &report.containers;
    println!("Containers: {}", counts.total());
    println!("  OCR pending:     {}", counts.pending);
    println!("  OCR in progress: {}", counts.in_progress);
    println!("  OCR completed:   {}", counts.completed);
    println!("  OCR failed:      {}", counts.failed);
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanCommandReport {
    pub scan: ScanReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrReport>,
}

/// Run one scan tick now, and optionally one OCR tick after it
pub async fn cmd_scan(
    scheduler: &Scheduler,
    with_ocr: bool,
    show_progress: bool,
) -> Result<ScanCommandReport> {
    let config = scheduler.config();
    require_watch_dirs(config)?;
    if let Some(state) = DaemonLifecycle::new(config).running() {
        warn!(pid = state.pid, "A daemon is running; files it holds will be skipped");
    }

    let (shutdown, signals) = termination_signal();
    let bar = start_progress_bar(0, "Converting", show_progress);
    let scan = scheduler
        .scan_tick_with(&shutdown, &|event| match event {
            ScanProgress::Discovered(total) => bar.set_length(total as u64),
            ScanProgress::Finished(path) => {
                if let Some(name) = path.file_name() {
                    bar.set_message(name.to_string_lossy().into_owned());
                }
                bar.inc(1);
            }
        })
        .await;
    finish_progress(&bar, "Scan finished");
    let scan = scan?;

    let ocr = if with_ocr && !shutdown.is_triggered() {
        Some(scheduler.ocr_tick(&shutdown).await?)
    } else {
        None
    };
    signals.abort();

    Ok(ScanCommandReport { scan, ocr })
}

pub fn print_scan(report: &ScanCommandReport) {
    let scan = &report.scan;
    println!("✓ Scan finished");
    println!("  Discovered:        {}", scan.discovered);
    println!("  Converted:         {}", scan.converted);
    println!("  Already converted: {}", scan.already_converted);
    println!("  Failed:            {}", scan.failed);
    println!("  Skipped:           {}", scan.skipped);
    for event in &scan.events {
        if let TickEvent::ConversionFailed { source, error, .. } = event {
            println!("  ✗ {}: {}", source.display(), error);
        }
    }

    if let Some(ocr) = &report.ocr {
        println!();
        println!("✓ OCR finished");
        println!("  Backlog:   {}", ocr.backlog);
        println!("  Completed: {}", ocr.completed);
        println!("  Failed:    {}", ocr.failed);
        println!("  Skipped:   {}", ocr.skipped);
        if let Some(reason) = &ocr.aborted {
            println!("  ⚠️  Stopped early: {}", reason);
        }
    }
}
