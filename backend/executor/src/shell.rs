//! Shell runtime: spawn one command through the configured shell and collect
//! its output.
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Interpreter invoked as `<shell> -c <command>`.
    pub shell: String,
    /// Maximum bytes kept per stream.
    pub max_output_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            max_output_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub truncated: bool,
}

/// Run `command` to completion. Only a failure to spawn is an `Err`; a
/// non-zero exit is reported through [`ShellOutput`].
pub async fn run_shell(command: &str, config: &ShellConfig) -> std::io::Result<ShellOutput> {
    let mut cmd = Command::new(&config.shell);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    let mut child = cmd.spawn()?;
    debug!(pid = ?child.id(), "[Shell] spawned");

    let max = config.max_output_bytes;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr) = tokio::join!(read_capped(stdout, max), read_capped(stderr, max));
    let (stdout, stdout_clipped) = stdout?;
    let (stderr, stderr_clipped) = stderr?;
    let status = child.wait().await?;

    Ok(ShellOutput {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        exit_code: status.code(),
        success: status.success(),
        truncated: stdout_clipped || stderr_clipped,
    })
}

/// Keep at most `max` bytes of a pipe and discard the rest, reading to EOF so
/// the writer never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, max: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };
    let mut kept = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    (&mut reader).take(limit).read_to_end(&mut kept).await?;

    let truncated = kept.len() > max;
    if truncated {
        kept.truncate(max);
        let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
        debug!(kept = max, dropped, "[Shell] output clipped");
    }
    Ok((kept, truncated))
}
