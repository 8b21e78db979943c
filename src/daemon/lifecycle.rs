//! Daemon process lifecycle: exclusive run, stop, status, restart
//!
//! The state file records who is running. It is never trusted on presence
//! alone: a recorded pid counts as running only if signal 0 reaches it and,
//! where the platform exposes it, its start time still matches.

use super::{OcrReport, ScanReport};
use crate::config::Config;
use crate::error::{Error, Result, SchedulerError};
use crate::fsutil::{process_alive, process_start_ticks, write_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Contents of the process state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    /// Process start time in clock ticks since boot, when known
    pub start_ticks: Option<u64>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub watch_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub last_scan_tick: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_ocr_tick: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scan_ticks: u64,
    #[serde(default)]
    pub ocr_ticks: u64,
    #[serde(default)]
    pub converted: u64,
    #[serde(default)]
    pub conversion_failures: u64,
    #[serde(default)]
    pub ocr_completed: u64,
    #[serde(default)]
    pub ocr_failures: u64,
}

impl DaemonState {
    fn for_current_process(watch_dirs: Vec<PathBuf>) -> Self {
        let pid = std::process::id();
        Self {
            pid,
            start_ticks: process_start_ticks(pid),
            started_at: Utc::now(),
            watch_dirs,
            last_scan_tick: None,
            last_ocr_tick: None,
            scan_ticks: 0,
            ocr_ticks: 0,
            converted: 0,
            conversion_failures: 0,
            ocr_completed: 0,
            ocr_failures: 0,
        }
    }

    /// Whether the recorded process is still the one that wrote this state
    pub fn is_live(&self) -> bool {
        if !process_alive(self.pid) {
            return false;
        }
        match (self.start_ticks, process_start_ticks(self.pid)) {
            (Some(recorded), Some(current)) => recorded == current,
            _ => true,
        }
    }
}

/// What `status` reports
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub state_file: PathBuf,
    /// A state file was found but its process is gone
    pub stale: bool,
    pub state: Option<DaemonState>,
}

/// Owns the state file for one daemon run. Dropping it removes the file if
/// it still names this process.
#[derive(Debug)]
pub struct RunGuard {
    path: PathBuf,
    state: Mutex<DaemonState>,
}

impl RunGuard {
    pub fn state(&self) -> DaemonState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn record_scan(&self, report: &ScanReport) {
        self.update(|state| {
            state.scan_ticks += 1;
            state.last_scan_tick = report.finished_at.or(report.started_at);
            state.converted += report.converted as u64;
            state.conversion_failures += report.failed as u64;
        });
    }

    pub fn record_ocr(&self, report: &OcrReport) {
        self.update(|state| {
            state.ocr_ticks += 1;
            state.last_ocr_tick = report.finished_at.or(report.started_at);
            state.ocr_completed += report.completed as u64;
            state.ocr_failures += report.failed as u64;
        });
    }

    fn update(&self, apply: impl FnOnce(&mut DaemonState)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut state);
        // written under the mutex so concurrent ticks cannot reorder writes
        let written = serde_json::to_vec_pretty(&*state)
            .map_err(io::Error::from)
            .and_then(|json| write_atomic(&self.path, &json));
        if let Err(e) = written {
            warn!("Cannot update daemon state {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let ours = read_state_file(&self.path)
            .map(|s| s.pid == std::process::id())
            .unwrap_or(false);
        if ours {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("Removed daemon state {}", self.path.display()),
                Err(e) => warn!("Cannot remove daemon state {}: {}", self.path.display(), e),
            }
        }
    }
}

fn read_state_file(path: &Path) -> Option<DaemonState> {
    let content = std::fs::read(path).ok()?;
    match serde_json::from_slice(&content) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Unreadable daemon state {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::Other(format!("pid {} out of range", pid)))?;
    // SAFETY: kill has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err.into())
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<()> {
    Err(Error::Other("stopping the daemon needs a unix platform".to_string()))
}

pub struct DaemonLifecycle {
    state_file: PathBuf,
    log_file: PathBuf,
    stop_timeout: Duration,
    poll_interval: Duration,
}

impl DaemonLifecycle {
    pub fn new(config: &Config) -> Self {
        Self::with_paths(
            config.paths.state_file.clone(),
            config.paths.log_file.clone(),
            Duration::from_secs(config.daemon.stop_timeout_secs),
        )
    }

    pub fn with_paths(state_file: PathBuf, log_file: PathBuf, stop_timeout: Duration) -> Self {
        Self {
            state_file,
            log_file,
            stop_timeout,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Recorded state, live or not
    pub fn read_state(&self) -> Option<DaemonState> {
        read_state_file(&self.state_file)
    }

    /// Recorded state of a daemon that is actually running
    pub fn running(&self) -> Option<DaemonState> {
        self.read_state().filter(DaemonState::is_live)
    }

    /// Claim the state file for this process.
    ///
    /// Fails with `AlreadyRunning` when a live daemon holds it. A file left
    /// behind by a dead process is replaced.
    pub fn acquire_exclusive_run(&self, watch_dirs: Vec<PathBuf>) -> Result<RunGuard> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.state_file)
            {
                Ok(mut file) => {
                    let state = DaemonState::for_current_process(watch_dirs);
                    file.write_all(&serde_json::to_vec_pretty(&state)?)?;
                    file.sync_all()?;
                    info!(pid = state.pid, "Claimed daemon state {}", self.state_file.display());
                    return Ok(RunGuard {
                        path: self.state_file.clone(),
                        state: Mutex::new(state),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(state) = self.running() {
                        return Err(SchedulerError::AlreadyRunning { pid: state.pid }.into());
                    }
                    warn!("Replacing stale daemon state {}", self.state_file.display());
                    match std::fs::remove_file(&self.state_file) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // another process claimed the file between our removal and creation
        match self.running() {
            Some(state) => Err(SchedulerError::AlreadyRunning { pid: state.pid }.into()),
            None => Err(Error::Other(format!(
                "could not claim {}",
                self.state_file.display()
            ))),
        }
    }

    pub fn status(&self) -> DaemonStatus {
        let state = self.read_state();
        let running = state.as_ref().map(DaemonState::is_live).unwrap_or(false);
        DaemonStatus {
            running,
            state_file: self.state_file.clone(),
            stale: state.is_some() && !running,
            state,
        }
    }

    /// Ask the running daemon to stop and wait for it to exit. Never
    /// escalates beyond SIGTERM.
    pub async fn stop(&self) -> Result<DaemonState> {
        let state = self.running().ok_or(SchedulerError::NotRunning)?;
        info!(pid = state.pid, "Sending SIGTERM");
        send_terminate(state.pid)?;

        let deadline = Instant::now() + self.stop_timeout;
        while state.is_live() {
            if Instant::now() >= deadline {
                return Err(SchedulerError::ShutdownTimeout {
                    pid: state.pid,
                    secs: self.stop_timeout.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        // a daemon killed on the way out leaves its file behind
        if self.read_state().map(|s| s.pid == state.pid).unwrap_or(false) {
            if let Err(e) = std::fs::remove_file(&self.state_file) {
                warn!("Cannot remove daemon state {}: {}", self.state_file.display(), e);
            }
        }
        info!(pid = state.pid, "Daemon stopped");
        Ok(state)
    }

    /// Stop whatever is running, then start a fresh daemon with `spawn`.
    /// Only `NotRunning` is tolerated from the stop half.
    pub async fn restart<F>(&self, spawn: F) -> Result<u32>
    where
        F: FnOnce(&Path) -> Result<u32>,
    {
        match self.stop().await {
            Ok(state) => debug!(pid = state.pid, "Previous daemon stopped"),
            Err(Error::Scheduler(SchedulerError::NotRunning)) => {
                debug!("No daemon was running")
            }
            Err(e) => return Err(e),
        }
        let pid = spawn(&self.log_file)?;
        info!(pid, "Daemon started");
        Ok(pid)
    }
}

/// Start `veridock daemon` in the background with output going to `log_file`
pub fn spawn_detached(config_file: Option<&Path>, log_file: &Path) -> Result<u32> {
    let exe = std::env::current_exe()?;
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(log_file)?;

    let mut cmd = std::process::Command::new(exe);
    if let Some(path) = config_file {
        cmd.arg("--config").arg(path);
    }
    cmd.arg("daemon")
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // own process group, so the terminal's signals do not reach it
        cmd.process_group(0);
    }

    let child = cmd.spawn()?;
    debug!(pid = child.id(), log = %log_file.display(), "Spawned detached daemon");
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lifecycle(tmp: &TempDir, timeout: Duration) -> DaemonLifecycle {
        DaemonLifecycle::with_paths(
            tmp.path().join("daemon.json"),
            tmp.path().join("daemon.log"),
            timeout,
        )
    }

    fn write_state(path: &Path, pid: u32) {
        let mut state = DaemonState::for_current_process(Vec::new());
        state.pid = pid;
        state.start_ticks = process_start_ticks(pid);
        std::fs::write(path, serde_json::to_vec(&state).unwrap()).unwrap();
    }

    #[test]
    fn test_exclusive_run_and_guard_cleanup() {
        let tmp = TempDir::new().unwrap();
        let lifecycle = lifecycle(&tmp, Duration::from_secs(1));

        let guard = lifecycle.acquire_exclusive_run(vec![tmp.path().to_path_buf()]).unwrap();
        assert!(lifecycle.state_file().exists());
        assert!(lifecycle.status().running);

        let err = lifecycle.acquire_exclusive_run(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Scheduler(SchedulerError::AlreadyRunning { pid }) if pid == std::process::id()
        ));

        drop(guard);
        assert!(!lifecycle.state_file().exists());
        assert!(!lifecycle.status().running);
    }

    #[test]
    fn test_stale_state_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let lifecycle = lifecycle(&tmp, Duration::from_secs(1));

        let mut state = DaemonState::for_current_process(Vec::new());
        // same pid, different start identity: a recycled pid
        state.start_ticks = state.start_ticks.map(|t| t + 1);
        std::fs::write(lifecycle.state_file(), serde_json::to_vec(&state).unwrap()).unwrap();

        if state.start_ticks.is_some() {
            let status = lifecycle.status();
            assert!(!status.running);
            assert!(status.stale);
        }

        std::fs::write(lifecycle.state_file(), b"not json").unwrap();
        let guard = lifecycle.acquire_exclusive_run(Vec::new()).unwrap();
        assert_eq!(guard.state().pid, std::process::id());
    }

    #[test]
    fn test_guard_records_ticks() {
        let tmp = TempDir::new().unwrap();
        let lifecycle = lifecycle(&tmp, Duration::from_secs(1));
        let guard = lifecycle.acquire_exclusive_run(Vec::new()).unwrap();

        let scan = ScanReport {
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            converted: 2,
            failed: 1,
            ..Default::default()
        };
        guard.record_scan(&scan);
        guard.record_ocr(&OcrReport {
            completed: 1,
            ..Default::default()
        });

        let stored = lifecycle.read_state().unwrap();
        assert_eq!(stored.scan_ticks, 1);
        assert_eq!(stored.ocr_ticks, 1);
        assert_eq!(stored.converted, 2);
        assert_eq!(stored.conversion_failures, 1);
        assert_eq!(stored.ocr_completed, 1);
        assert_eq!(stored.last_scan_tick, scan.finished_at);
    }

    #[tokio::test]
    async fn test_stop_without_daemon() {
        let tmp = TempDir::new().unwrap();
        let lifecycle = lifecycle(&tmp, Duration::from_secs(1));
        let err = lifecycle.stop().await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_restart_tolerates_not_running() {
        let tmp = TempDir::new().unwrap();
        let lifecycle = lifecycle(&tmp, Duration::from_secs(1));
        let pid = lifecycle
            .restart(|log| {
                assert!(log.ends_with("daemon.log"));
                Ok(4242)
            })
            .await
            .unwrap();
        assert_eq!(pid, 4242);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_terminates_process() {
        let tmp = TempDir::new().unwrap();
        let lifecycle = lifecycle(&tmp, Duration::from_secs(5));

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        write_state(lifecycle.state_file(), pid);
        // reap the child so it does not linger as a zombie
        let reaper = std::thread::spawn(move || child.wait());

        let stopped = lifecycle.stop().await.unwrap();
        assert_eq!(stopped.pid, pid);
        assert!(!lifecycle.state_file().exists());
        assert!(reaper.join().unwrap().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_times_out_on_stubborn_process() {
        let tmp = TempDir::new().unwrap();
        let lifecycle = lifecycle(&tmp, Duration::from_millis(600));

        let mut child = std::process::Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        // give the shell time to install its trap
        tokio::time::sleep(Duration::from_millis(500)).await;
        write_state(lifecycle.state_file(), child.id());

        let err = lifecycle.stop().await.unwrap_err();
        assert_eq!(err.exit_code(), 5);
        assert!(lifecycle.state_file().exists());

        child.kill().unwrap();
        child.wait().unwrap();
    }
}
