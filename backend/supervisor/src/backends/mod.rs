//! Process backends: the strategies that turn a launch request into a
//! running, reachable process.

pub mod exec;
pub mod sunshine;
pub mod xpra;

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::{debug, warn};

use aerodesk_core::{BackendKind, ClientSender, ConnectionId, GatewayError, InstanceId, ServerEvent};

use crate::registry::{NativeSession, NativeSessionRegistry, Reservation, SessionToken};

pub use exec::ExecBackend;
pub use sunshine::{SunshineBackend, SunshineConfig};
pub use xpra::{loopback_url, parse_port, XpraBackend, XpraConfig};

/// Everything a backend needs to start one instance.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub app_key: String,
    pub instance_id: InstanceId,
    pub command: String,
    pub owner: ConnectionId,
    pub events: ClientSender,
}

#[async_trait]
pub trait ProcessBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Spawn the process and register it under `reservation`.
    ///
    /// An `Err` means nothing was registered; the caller reports it as
    /// `app:error`. Everything learned after the session is registered is
    /// emitted by the backend itself.
    async fn launch(&self, request: LaunchRequest, reservation: Reservation) -> Result<(), GatewayError>;

    /// Backend-specific release that runs before the process is signalled.
    async fn teardown(&self, _session: &NativeSession) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Backends by kind.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<BackendKind, Arc<dyn ProcessBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in backends sharing one registry.
    pub fn standard(
        registry: &NativeSessionRegistry,
        shell: impl Into<String>,
        xpra: XpraConfig,
        sunshine: SunshineConfig,
    ) -> Self {
        Self::new()
            .with(Arc::new(ExecBackend::new(registry.clone(), shell)))
            .with(Arc::new(XpraBackend::new(registry.clone(), xpra)))
            .with(Arc::new(SunshineBackend::new(registry.clone(), sunshine)))
    }

    pub fn with(mut self, backend: Arc<dyn ProcessBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn get(&self, kind: BackendKind) -> Result<Arc<dyn ProcessBackend>, GatewayError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBackend(kind.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

pub(crate) fn emit(events: &ClientSender, event: ServerEvent) {
    let name = event.name();
    if events.send(event).is_err() {
        debug!(event = name, "connection gone; event dropped");
    }
}

/// Wait for `child` to exit, then drop its registry entry if this launch
/// still owns it. `None` means someone else (an explicit kill) cleaned up.
pub(crate) async fn reap(
    mut child: Child,
    registry: &NativeSessionRegistry,
    instance_id: &str,
    token: SessionToken,
) -> Option<(NativeSession, Option<ExitStatus>)> {
    let status = match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(instance_id, error = %e, "failed to wait on child");
            None
        }
    };
    debug!(instance_id, ?status, "process exited");
    registry
        .remove_if_current(instance_id, token)
        .map(|session| (session, status))
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

/// Forward raw chunks from one pipe as `app:output` events until EOF.
pub(crate) async fn forward_output<R>(
    mut reader: R,
    stream: OutputStream,
    app_key: String,
    instance_id: InstanceId,
    events: ClientSender,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(instance_id = %instance_id, error = %e, "output pipe closed");
                break;
            }
        };
        let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
        let (stdout, stderr) = match stream {
            OutputStream::Stdout => (Some(chunk), None),
            OutputStream::Stderr => (None, Some(chunk)),
        };
        emit(
            &events,
            ServerEvent::AppOutput {
                app_key: app_key.clone(),
                instance_id: instance_id.clone(),
                stdout,
                stderr,
            },
        );
    }
}
