//! Sunshine backend: a fixed-port streaming host. Readiness cannot be
//! observed, so the stream is announced after a settle delay.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use aerodesk_core::{BackendKind, GatewayError, ServerEvent};

use super::{emit, reap, LaunchRequest, ProcessBackend};
use crate::registry::{NativeSessionRegistry, Reservation, SessionSpec};

const LAUNCH_FAILED: &str = "Failed to launch Sunshine. Is Sunshine installed and configured?";

#[derive(Debug, Clone)]
pub struct SunshineConfig {
    pub binary: String,
    /// Web UI address announced to clients.
    pub url: String,
    pub settle_delay: Duration,
}

impl Default for SunshineConfig {
    fn default() -> Self {
        Self {
            binary: "sunshine".to_string(),
            url: "http://localhost:47989".to_string(),
            settle_delay: Duration::from_millis(2000),
        }
    }
}

pub struct SunshineBackend {
    registry: NativeSessionRegistry,
    config: SunshineConfig,
}

impl SunshineBackend {
    pub fn new(registry: NativeSessionRegistry, config: SunshineConfig) -> Self {
        Self { registry, config }
    }
}

#[async_trait]
impl ProcessBackend for SunshineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sunshine
    }

    async fn launch(&self, request: LaunchRequest, reservation: Reservation) -> Result<(), GatewayError> {
        let LaunchRequest {
            app_key,
            instance_id,
            command,
            owner,
            events,
        } = request;

        info!(app_key = %app_key, instance_id = %instance_id, "Launching Sunshine");
        let mut child = Command::new(&self.config.binary)
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                error!(error = %e, binary = %self.config.binary, "Sunshine launch error");
                GatewayError::SpawnFailure(LAUNCH_FAILED.to_string())
            })?;

        let pid = child
            .id()
            .ok_or_else(|| GatewayError::SpawnFailure(LAUNCH_FAILED.to_string()))?;
        let put = reservation.put(SessionSpec {
            app_key: app_key.clone(),
            backend: BackendKind::Sunshine,
            pid,
            process_group: false,
            stream_url: None,
            owner,
        });
        let session = match put {
            Ok(session) => session,
            Err(e) => {
                info!(instance_id = %instance_id, "Sunshine launch cancelled");
                let _ = child.start_kill();
                return Err(e);
            }
        };
        let token = session.token();

        // Best effort: announce after the settle delay if the session survived it.
        {
            let registry = self.registry.clone();
            let events = events.clone();
            let app_key = app_key.clone();
            let instance_id = instance_id.clone();
            let url = self.config.url.clone();
            let delay = self.config.settle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if registry.set_stream_url(&instance_id, token, &url).is_some() {
                    info!(instance_id = %instance_id, url = %url, "Sunshine stream ready");
                    emit(
                        &events,
                        ServerEvent::AppStream {
                            instance_id,
                            app_key,
                            backend: BackendKind::Sunshine,
                            url,
                        },
                    );
                } else {
                    debug!(instance_id = %instance_id, "Sunshine session ended before it settled");
                }
            });
        }

        let registry = self.registry.clone();
        tokio::spawn(async move {
            let Some((session, status)) = reap(child, &registry, &instance_id, token).await else {
                return;
            };
            info!(instance_id = %instance_id, ?status, "Sunshine process exited");
            let failed = !status.is_some_and(|s| s.success());
            let event = if failed && session.stream_url.is_none() {
                ServerEvent::AppError {
                    app_key,
                    instance_id,
                    error: LAUNCH_FAILED.to_string(),
                }
            } else {
                ServerEvent::AppExit {
                    app_key,
                    instance_id,
                    code: status.and_then(|s| s.code()),
                }
            };
            emit(&events, event);
        });

        Ok(())
    }
}
