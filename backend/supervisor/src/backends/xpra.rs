//! Xpra backend: run the app as the child of an xpra HTML5 server on a
//! private display, and recover the server's port from its own output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use aerodesk_core::{BackendKind, GatewayError, ServerEvent};

use super::{emit, reap, LaunchRequest, ProcessBackend};
use crate::registry::{NativeSession, NativeSessionRegistry, Reservation, SessionSpec};

static PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"port (\d+)").expect("static regex"));

const LAUNCH_FAILED: &str = "Failed to launch Xpra. Is Xpra installed?";
const PARSE_FAILED: &str = "Failed to parse Xpra port";

#[derive(Debug, Clone)]
pub struct XpraConfig {
    pub binary: String,
    /// First display number handed out; later launches take the next free one.
    pub base_display: u32,
    /// How long to wait for the port announcement.
    pub ready_timeout: Duration,
}

impl Default for XpraConfig {
    fn default() -> Self {
        Self {
            binary: "xpra".to_string(),
            base_display: 100,
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Extract the announced port from xpra output.
pub fn parse_port(output: &str) -> Result<u16, GatewayError> {
    PORT_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .filter(|port| *port != 0)
        .ok_or_else(|| GatewayError::ParseFailure(PARSE_FAILED.to_string()))
}

pub fn loopback_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Arguments for `xpra start`.
pub fn start_args(display: &str, command: &str) -> Vec<String> {
    vec![
        "start".to_string(),
        display.to_string(),
        format!("--start-child={command}"),
        "--html=on".to_string(),
        "--bind-tcp=127.0.0.1:0".to_string(),
        // Stay in the foreground so the spawned pid is the server itself.
        "--daemon=no".to_string(),
    ]
}

pub struct XpraBackend {
    registry: NativeSessionRegistry,
    config: XpraConfig,
}

impl XpraBackend {
    pub fn new(registry: NativeSessionRegistry, config: XpraConfig) -> Self {
        Self { registry, config }
    }
}

#[async_trait]
impl ProcessBackend for XpraBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Xpra
    }

    async fn launch(&self, request: LaunchRequest, mut reservation: Reservation) -> Result<(), GatewayError> {
        let LaunchRequest {
            app_key,
            instance_id,
            command,
            owner,
            events,
        } = request;

        let display_name = format!(":{}", reservation.allocate_display(self.config.base_display));
        let args = start_args(&display_name, &command);
        info!(app_key = %app_key, instance_id = %instance_id, display = %display_name, "Launching Xpra");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!(error = %e, binary = %self.config.binary, "Xpra launch error");
                GatewayError::SpawnFailure(LAUNCH_FAILED.to_string())
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain(BufReader::new(stderr).lines(), instance_id.clone()));
        }
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::SpawnFailure(LAUNCH_FAILED.to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let port = match tokio::time::timeout(self.config.ready_timeout, wait_for_port(&mut lines)).await {
            Ok(Some(port)) => port,
            Ok(None) => return Err(output_ended(&mut child).await),
            Err(_) => {
                warn!(instance_id = %instance_id, "Xpra never announced a port");
                let _ = child.start_kill();
                return Err(GatewayError::ParseFailure(format!(
                    "{PARSE_FAILED}: no port announced within {}s",
                    self.config.ready_timeout.as_secs()
                )));
            }
        };

        let pid = child
            .id()
            .ok_or_else(|| GatewayError::SpawnFailure("Xpra exited right after starting".to_string()))?;
        let url = loopback_url(port);
        let put = reservation.put(SessionSpec {
            app_key: app_key.clone(),
            backend: BackendKind::Xpra,
            pid,
            process_group: false,
            stream_url: Some(url.clone()),
            owner,
        });
        let session = match put {
            Ok(session) => session,
            Err(e) => {
                info!(instance_id = %instance_id, "Xpra launch cancelled before it was ready");
                let _ = child.start_kill();
                return Err(e);
            }
        };
        info!(instance_id = %instance_id, url = %url, "Xpra stream ready");

        emit(
            &events,
            ServerEvent::AppStream {
                instance_id: instance_id.clone(),
                app_key: app_key.clone(),
                backend: BackendKind::Xpra,
                url,
            },
        );

        let registry = self.registry.clone();
        let token = session.token();
        tokio::spawn(async move {
            tokio::spawn(drain(lines, instance_id.clone()));
            if let Some((_, status)) = reap(child, &registry, &instance_id, token).await {
                info!(instance_id = %instance_id, ?status, "Xpra process exited");
                emit(
                    &events,
                    ServerEvent::AppExit {
                        app_key,
                        instance_id,
                        code: status.and_then(|s| s.code()),
                    },
                );
            }
        });

        Ok(())
    }

    async fn teardown(&self, session: &NativeSession) -> Result<(), GatewayError> {
        let Some(display_name) = session.display.as_deref() else {
            return Ok(());
        };
        let output = Command::new(&self.config.binary)
            .arg("stop")
            .arg(display_name)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| GatewayError::TeardownFailure(format!("xpra stop {display_name}: {e}")))?;
        if !output.status.success() {
            return Err(GatewayError::TeardownFailure(format!(
                "xpra stop {display_name} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(display = %display_name, "Xpra display stopped");
        Ok(())
    }
}

async fn wait_for_port<R>(lines: &mut Lines<BufReader<R>>) -> Option<u16>
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(line = %line, "xpra");
                if let Ok(port) = parse_port(&line) {
                    return Some(port);
                }
            }
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed reading Xpra output");
                return None;
            }
        }
    }
}

/// Classify a launch whose stdout closed without a port.
async fn output_ended(child: &mut Child) -> GatewayError {
    let status: Option<ExitStatus> =
        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => {
                let _ = child.start_kill();
                None
            }
        };

    match status {
        Some(status) if !status.success() => {
            error!(%status, "Xpra exited before it was ready");
            GatewayError::SpawnFailure(LAUNCH_FAILED.to_string())
        }
        _ => {
            error!("{PARSE_FAILED}");
            GatewayError::ParseFailure(PARSE_FAILED.to_string())
        }
    }
}

async fn drain<R>(mut lines: Lines<BufReader<R>>, instance_id: String)
where
    R: AsyncRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(instance_id = %instance_id, line = %line, "xpra");
    }
}
