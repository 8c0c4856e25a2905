//! Direct-exec backend: run the launch command in a shell and stream its
//! output back to the launching connection.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use aerodesk_core::{BackendKind, GatewayError, ServerEvent};

use super::{emit, forward_output, reap, LaunchRequest, OutputStream, ProcessBackend};
use crate::process::ProcessHandle;
use crate::registry::{NativeSessionRegistry, Reservation, SessionSpec};

pub struct ExecBackend {
    registry: NativeSessionRegistry,
    shell: String,
}

impl ExecBackend {
    pub fn new(registry: NativeSessionRegistry, shell: impl Into<String>) -> Self {
        Self {
            registry,
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl ProcessBackend for ExecBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Exec
    }

    async fn launch(&self, request: LaunchRequest, reservation: Reservation) -> Result<(), GatewayError> {
        let LaunchRequest {
            app_key,
            instance_id,
            command,
            owner,
            events,
        } = request;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own group, so a kill also reaches whatever the shell forks.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            error!(app_key = %app_key, error = %e, "exec launch failed");
            GatewayError::SpawnFailure(format!("Failed to launch {app_key}: {e}"))
        })?;

        let pid = child.id().ok_or_else(|| {
            GatewayError::SpawnFailure(format!("{app_key} exited before it could be registered"))
        })?;

        let put = reservation.put(SessionSpec {
            app_key: app_key.clone(),
            backend: BackendKind::Exec,
            pid,
            process_group: cfg!(unix),
            stream_url: None,
            owner,
        });
        let session = match put {
            Ok(session) => session,
            Err(e) => {
                debug!(instance_id = %instance_id, "exec launch cancelled, terminating");
                let handle = if cfg!(unix) {
                    ProcessHandle::group_leader(pid)
                } else {
                    ProcessHandle::new(pid)
                };
                if let Err(err) = handle.terminate() {
                    warn!(instance_id = %instance_id, error = %err, "failed to stop cancelled launch");
                }
                return Err(e);
            }
        };
        info!(instance_id = %instance_id, pid, "exec app running");

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_output(
                stdout,
                OutputStream::Stdout,
                app_key.clone(),
                instance_id.clone(),
                events.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_output(
                stderr,
                OutputStream::Stderr,
                app_key.clone(),
                instance_id.clone(),
                events.clone(),
            )));
        }

        let registry = self.registry.clone();
        let token = session.token();
        tokio::spawn(async move {
            // Leave the registry as soon as the shell exits, even while a
            // background descendant still holds the pipes.
            let reaped = reap(child, &registry, &instance_id, token).await;
            for forwarder in forwarders {
                let _ = forwarder.await;
            }
            if let Some((_, status)) = reaped {
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
}
