//! Durable writes, per-container locks and process liveness

use crate::error::PatchError;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Unparsable lock files younger than this are assumed to be mid-write
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(60);

/// Write `bytes` to `path` through a dot-prefixed temp file in the same
/// directory: write, fsync, rename, fsync the directory.
///
/// Readers never observe a partial file and the temp name is never `.svg`,
/// so directory scans cannot pick it up.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".veridock-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Whether a process with this pid exists. `EPERM` means it exists but
/// belongs to someone else.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill has no memory-safety preconditions; signal 0 only checks existence
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without signal-0 there is no cheap liveness check; assume the holder is alive.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Kernel start time of a process in clock ticks (field 22 of
/// `/proc/<pid>/stat`). Distinguishes a live daemon from an unrelated
/// process that reused its pid.
#[cfg(target_os = "linux")]
pub fn process_start_ticks(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm (field 2) may contain spaces and parens; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
pub fn process_start_ticks(_pid: u32) -> Option<u64> {
    None
}

/// Sidecar lock path for a container (`doc.svg` -> `doc.svg.lock`)
pub fn lock_path(container: &Path) -> PathBuf {
    let mut name = container
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    container.with_file_name(name)
}

/// Exclusive single-flight lock on one container.
///
/// Created with `create_new`; the file holds the owner's pid and, where the
/// platform exposes it, the process start time. Locks whose holder is gone,
/// or whose pid now belongs to a different process, are reclaimed. Dropping
/// the guard removes the file.
#[derive(Debug)]
pub struct ContainerLock {
    path: PathBuf,
}

impl ContainerLock {
    pub fn acquire(container: &Path) -> Result<Self, PatchError> {
        let path = lock_path(container);
        match Self::create(&path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(locked(&path, format!("unavailable ({})", e))),
        }

        match read_holder(&path) {
            Holder::Alive(pid) => Err(locked(&path, pid.to_string())),
            Holder::Unknown => Err(locked(&path, "unknown".to_string())),
            Holder::Stale(reason) => {
                warn!(lock = %path.display(), "Reclaiming stale lock: {}", reason);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(locked(&path, format!("unremovable ({})", e))),
                }
                Self::create(&path).map_err(|_| locked(&path, "unknown".to_string()))
            }
        }
    }

    /// Whether a live holder currently owns the container's lock
    pub fn is_held(container: &Path) -> bool {
        let path = lock_path(container);
        path.exists() && !matches!(read_holder(&path), Holder::Stale(_))
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let pid = std::process::id();
        match process_start_ticks(pid) {
            Some(ticks) => writeln!(file, "{} {}", pid, ticks)?,
            None => writeln!(file, "{}", pid)?,
        }
        file.sync_all()?;
        debug!(lock = %path.display(), "Acquired container lock");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ContainerLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(lock = %self.path.display(), "Failed to remove lock: {}", e);
            }
        }
    }
}

enum Holder {
    Alive(u32),
    Unknown,
    Stale(String),
}

fn read_holder(path: &Path) -> Holder {
    let mut content = String::new();
    let read = File::open(path).and_then(|mut f| f.read_to_string(&mut content));
    if let Err(e) = read {
        if e.kind() == io::ErrorKind::NotFound {
            return Holder::Stale("lock vanished".to_string());
        }
        return Holder::Unknown;
    }

    match parse_holder(&content) {
        Some((pid, _)) if !process_alive(pid) => Holder::Stale(format!("holder {} is gone", pid)),
        Some((pid, Some(recorded))) => match process_start_ticks(pid) {
            Some(current) if current != recorded => {
                Holder::Stale(format!("pid {} now belongs to another process", pid))
            }
            _ => Holder::Alive(pid),
        },
        Some((pid, None)) => Holder::Alive(pid),
        None => {
            let age = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok());
            match age {
                Some(age) if age > UNREADABLE_LOCK_GRACE => {
                    Holder::Stale("unreadable lock file".to_string())
                }
                _ => Holder::Unknown,
            }
        }
    }
}

/// `<pid>` or `<pid> <start ticks>`
fn parse_holder(content: &str) -> Option<(u32, Option<u64>)> {
    let mut fields = content.split_whitespace();
    let pid = fields.next()?.parse().ok()?;
    let ticks = match fields.next() {
        Some(field) => Some(field.parse().ok()?),
        None => None,
    };
    if fields.next().is_some() {
        return None;
    }
    Some((pid, ticks))
}

fn locked(path: &Path, holder: String) -> PatchError {
    PatchError::Locked {
        path: path.to_path_buf(),
        holder,
    }
}
