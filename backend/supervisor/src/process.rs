//! OS process handles.
//!
//! A session records the pid of the process it owns; the `Child` itself stays
//! with the task that reaps it.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// The pid also names a process group holding everything it spawned.
    #[serde(skip)]
    pub process_group: bool,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            process_group: false,
        }
    }

    /// Handle for a child started with `process_group(0)`.
    pub fn group_leader(pid: u32) -> Self {
        Self {
            pid,
            process_group: true,
        }
    }

    /// Ask the process (or its whole group) to terminate (SIGTERM). Delivery
    /// failures are returned, never retried.
    pub fn terminate(&self) -> Result<()> {
        info!(pid = self.pid, group = self.process_group, "Sending SIGTERM");
        send_terminate(self.pid, self.process_group)
            .with_context(|| format!("failed to signal pid {}", self.pid))?;
        debug!(pid = self.pid, "SIGTERM delivered");
        Ok(())
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32, group: bool) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // A negative pid addresses the process group.
    let target = if group { -pid } else { pid };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(target, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(windows)]
fn send_terminate(pid: u32, group: bool) -> std::io::Result<()> {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.args(["/F", "/PID", &pid.to_string()]);
    if group {
        cmd.arg("/T");
    }
    let status = cmd.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("taskkill exited with {status}")))
    }
}
