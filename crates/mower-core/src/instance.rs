//! PID-file single-instance protection.
//!
//! Running two controllers at once would fight over I²C, GPIO, and the
//! serial ports.  On startup the supervisor checks the PID file: a live
//! sibling process (its command line mentions the mower) blocks startup
//! unless force-cleanup is requested, in which case the sibling is sent
//! SIGTERM, given two seconds, then SIGKILL.  Stale files (dead PID or an
//! unrelated process that recycled the PID) are cleaned up silently.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use mower_types::{ErrorCode, MowerError};

pub struct SingleInstanceLock {
    pid_file: PathBuf,
    locked: bool,
}

impl SingleInstanceLock {
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            locked: false,
        }
    }

    /// Acquire the lock, optionally terminating a live sibling first.
    pub fn acquire(&mut self, force_cleanup: bool) -> Result<(), MowerError> {
        if let Some(existing_pid) = self.read_pid_file() {
            if is_sibling_process(existing_pid) {
                if !force_cleanup {
                    error!(
                        pid = existing_pid,
                        "another mower instance is already running"
                    );
                    return Err(MowerError::hardware(
                        ErrorCode::InitializationFailed,
                        "single_instance",
                        format!("another mower instance is running (pid {existing_pid})"),
                    ));
                }
                warn!(pid = existing_pid, "force cleanup: terminating sibling instance");
                terminate(existing_pid);
            } else {
                warn!(
                    pid = existing_pid,
                    "cleaning up stale pid file (process gone or unrelated)"
                );
            }
            self.remove_pid_file();
        }

        let pid = std::process::id();
        std::fs::write(&self.pid_file, format!("{pid}\n")).map_err(|e| MowerError::Io {
            path: self.pid_file.display().to_string(),
            source: e,
        })?;
        self.locked = true;
        info!(pid, path = %self.pid_file.display(), "single instance lock acquired");
        Ok(())
    }

    /// Release the lock, removing the PID file.  No-op when not held.
    pub fn release(&mut self) {
        if self.locked {
            self.remove_pid_file();
            self.locked = false;
            info!("single instance lock released");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn read_pid_file(&self) -> Option<i32> {
        let raw = std::fs::read_to_string(&self.pid_file).ok()?;
        raw.trim().parse().ok()
    }

    fn remove_pid_file(&self) {
        if self.pid_file.exists() && std::fs::remove_file(&self.pid_file).is_err() {
            warn!(path = %self.pid_file.display(), "could not remove pid file");
        }
    }
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Whether `pid` is alive *and* looks like another mower controller.
fn is_sibling_process(pid: i32) -> bool {
    if pid <= 0 || !process_alive(pid) {
        return false;
    }
    match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(raw) => {
            let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
            let sibling = cmdline.contains("mower");
            if !sibling {
                warn!(pid, %cmdline, "pid from file belongs to an unrelated process");
            }
            sibling
        }
        // Alive but unreadable (permissions): assume sibling to be safe.
        Err(_) => true,
    }
}

fn process_alive(pid: i32) -> bool {
    // Safety: signal 0 performs existence/permission checking only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// SIGTERM, a two-second grace period, then SIGKILL.
fn terminate(pid: i32) {
    // Safety: best-effort signalling of an explicit pid.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if !process_alive(pid) {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    warn!(pid, "sibling ignored SIGTERM; escalating to SIGKILL");
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    std::thread::sleep(Duration::from_secs(1));
}
