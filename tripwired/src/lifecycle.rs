//! Single-instance enforcement.
//!
//! One daemon per profile. The instance marker is a pid file inside the
//! profile directory; a marker whose process is gone, or that holds no
//! pid, is stale and gets replaced.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::{DaemonError, DaemonResult};

/// File name of the instance marker inside a profile directory.
pub const PID_FILE: &str = "daemon.pid";

/// Proof of ownership of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub profile: String,
    pub pid: u32,
    pub path: PathBuf,
}

/// OS-facing daemon lifecycle.
pub trait Lifecycle: Send + Sync {
    /// Claim the profile for this process. Fails if a live instance owns it.
    fn acquire_exclusive(&self, profile: &str) -> DaemonResult<InstanceHandle>;

    /// Give the profile up. Only removes a marker that still names us.
    fn release(&self, handle: &InstanceHandle) -> DaemonResult<()>;

    /// Whether the process behind `handle` is still running.
    fn is_alive(&self, handle: &InstanceHandle) -> bool;
}

/// Pid-file lifecycle rooted at the state directory.
#[derive(Debug, Clone)]
pub struct PidFileLifecycle {
    state_dir: PathBuf,
}

impl PidFileLifecycle {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn marker_path(&self, profile: &str) -> PathBuf {
        self.state_dir.join(profile).join(PID_FILE)
    }

    /// Handle of the instance recorded for `profile`, if any. The process
    /// may be dead; check with [`Lifecycle::is_alive`].
    pub fn current(&self, profile: &str) -> DaemonResult<Option<InstanceHandle>> {
        let path = self.marker_path(profile);
        Ok(read_pid(&path)?.map(|pid| InstanceHandle {
            profile: profile.to_string(),
            pid,
            path,
        }))
    }
}

impl Lifecycle for PidFileLifecycle {
    fn acquire_exclusive(&self, profile: &str) -> DaemonResult<InstanceHandle> {
        let path = self.marker_path(profile);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| marker_error(&path, e))?;
        }

        match read_marker(&path)? {
            Marker::Absent => {}
            Marker::Pid(pid) if process_alive(pid) => {
                return Err(DaemonError::AlreadyRunning {
                    profile: profile.to_string(),
                    pid,
                });
            }
            Marker::Pid(pid) => {
                warn!(pid, path = %path.display(), "Removing stale instance marker");
                remove_marker(&path)?;
            }
            Marker::Corrupt => {
                warn!(path = %path.display(), "Removing unreadable instance marker");
                remove_marker(&path)?;
            }
        }

        let pid = std::process::id();
        publish_marker(&path, pid).map_err(|e| match e.kind() {
            // Lost a race with another starting instance
            ErrorKind::AlreadyExists => DaemonError::AlreadyRunning {
                profile: profile.to_string(),
                pid: read_pid(&path).ok().flatten().unwrap_or_default(),
            },
            _ => marker_error(&path, e),
        })?;

        info!(profile, pid, path = %path.display(), "Instance marker acquired");
        Ok(InstanceHandle {
            profile: profile.to_string(),
            pid,
            path,
        })
    }

    fn release(&self, handle: &InstanceHandle) -> DaemonResult<()> {
        match read_pid(&handle.path)? {
            Some(pid) if pid == handle.pid => {
                remove_marker(&handle.path)?;
                info!(profile = %handle.profile, "Instance marker released");
            }
            Some(pid) => warn!(pid, ours = handle.pid, "Instance marker owned by another process, left in place"),
            None => {}
        }
        Ok(())
    }

    fn is_alive(&self, handle: &InstanceHandle) -> bool {
        process_alive(handle.pid)
    }
}

/// Zero-signal liveness probe.
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// What the marker file holds.
enum Marker {
    Absent,
    Pid(u32),
    /// Exists but holds no pid (empty, garbage, unreadable)
    Corrupt,
}

fn read_marker(path: &Path) -> DaemonResult<Marker> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .trim()
            .parse::<u32>()
            .map(Marker::Pid)
            .unwrap_or(Marker::Corrupt)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Marker::Absent),
        Err(_) if path.is_file() => Ok(Marker::Corrupt),
        Err(e) => Err(marker_error(path, e)),
    }
}

fn read_pid(path: &Path) -> DaemonResult<Option<u32>> {
    Ok(match read_marker(path)? {
        Marker::Pid(pid) => Some(pid),
        Marker::Absent | Marker::Corrupt => None,
    })
}

/// Write the pid to a private file, then link it into place. The marker
/// never exists without its pid; the link fails with `AlreadyExists` when
/// another instance got there first.
fn publish_marker(path: &Path, pid: u32) -> std::io::Result<()> {
    let staging = path.with_extension(format!("pid.{}", pid));
    let result = write_staging(&staging, pid).and_then(|()| fs::hard_link(&staging, path));
    let _ = fs::remove_file(&staging);
    result
}

fn write_staging(staging: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(staging)?;
    writeln!(file, "{}", pid)?;
    file.sync_all()
}

fn remove_marker(path: &Path) -> DaemonResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(marker_error(path, e)),
    }
}

fn marker_error(path: &Path, e: std::io::Error) -> DaemonError {
    DaemonError::Lifecycle {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
