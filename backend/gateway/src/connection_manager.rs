//! Connection Session Manager.
//!
//! Owns the live connections and routes every inbound signal to the risk
//! gate, the command executor, or a process backend. Launch outcomes are
//! reported asynchronously; the caller only learns that the launch was taken.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use aerodesk_config::AppCatalog;
use aerodesk_core::{
    ClientSender, ClientSignal, ConnectionId, GatewayError, LaunchSignal, ServerEvent,
};
use aerodesk_executor::{CommandExecutor, ExecOutcome, preview};
use aerodesk_supervisor::{
    BackendSet, LaunchRequest, NativeSession, NativeSessionRegistry, ProcessBackend, Reservation,
};

use crate::session_registry::ConnectionRegistry;

#[derive(Clone)]
pub struct ConnectionManager {
    connections: ConnectionRegistry,
    sessions: NativeSessionRegistry,
    backends: BackendSet,
    catalog: Arc<dyn AppCatalog>,
    executor: CommandExecutor,
    kill_on_disconnect: bool,
}

impl ConnectionManager {
    pub fn new(
        sessions: NativeSessionRegistry,
        backends: BackendSet,
        catalog: Arc<dyn AppCatalog>,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            sessions,
            backends,
            catalog,
            executor,
            kill_on_disconnect: false,
        }
    }

    /// Terminate a connection's sessions when it closes.
    pub fn with_kill_on_disconnect(mut self, enabled: bool) -> Self {
        self.kill_on_disconnect = enabled;
        self
    }

    pub fn sessions(&self) -> &NativeSessionRegistry {
        &self.sessions
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Register a new connection and greet it with its id.
    pub async fn connect(&self, sender: ClientSender) -> ConnectionId {
        let id = uuid::Uuid::new_v4().to_string();
        let handle = self.connections.register(id.clone(), sender).await;
        handle.send(ServerEvent::ConnectionReady {
            connection_id: id.clone(),
        });
        info!(connection_id = %id, "[Gateway] connection opened");
        id
    }

    pub async fn disconnect(&self, connection_id: &str) {
        self.connections.unregister(connection_id).await;

        let owned = self.sessions.owned_by(connection_id);
        if self.kill_on_disconnect {
            for instance_id in self.sessions.pending_owned_by(connection_id) {
                self.sessions.cancel_pending(&instance_id);
            }
            for instance_id in &owned {
                self.kill(instance_id).await;
            }
        } else if !owned.is_empty() {
            debug!(
                connection_id,
                sessions = owned.len(),
                "[Gateway] sessions outlive their connection"
            );
        }
        info!(connection_id, "[Gateway] connection closed");
    }

    // -----------------------------------------------------------------------
    // Signal routing
    // -----------------------------------------------------------------------

    pub async fn handle_signal(&self, connection_id: &str, signal: ClientSignal) {
        match signal {
            ClientSignal::Launch(launch) => self.launch(connection_id, launch).await,
            ClientSignal::Kill { instance_id } => {
                self.kill(&instance_id).await;
            }
            ClientSignal::Exec { command } => self.exec_over_channel(connection_id, &command).await,
            ClientSignal::Approve => self.approve(connection_id).await,
            ClientSignal::Deny => self.deny(connection_id).await,
            ClientSignal::Ping => {
                self.connections.send_to(connection_id, ServerEvent::Pong).await;
            }
        }
    }

    /// Resolve and start a native app. Every failure becomes one `app:error`
    /// and leaves the session registry as it was.
    pub async fn launch(&self, connection_id: &str, signal: LaunchSignal) {
        let Some(conn) = self.connections.get(connection_id).await else {
            warn!(connection_id, "[Gateway] launch from unknown connection");
            return;
        };

        let app_key = signal.app_key.clone();
        let instance_id = signal.instance_id.clone();
        info!(app_key = %app_key, instance_id = %instance_id, "[Gateway] launch requested");

        let prepared = self.prepare_launch(connection_id, signal, conn.sender.clone()).await;
        let (backend, request, reservation) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                report_launch_error(&conn.sender, app_key, instance_id, e);
                return;
            }
        };

        let events = conn.sender.clone();
        tokio::spawn(async move {
            match backend.launch(request, reservation).await {
                Ok(()) => {}
                Err(GatewayError::Cancelled(_)) => {
                    info!(
                        instance_id = %instance_id,
                        "[Gateway] launch cancelled before it registered"
                    );
                }
                Err(e) => report_launch_error(&events, app_key, instance_id, e),
            }
        });
    }

    async fn prepare_launch(
        &self,
        connection_id: &str,
        signal: LaunchSignal,
        events: ClientSender,
    ) -> Result<(Arc<dyn ProcessBackend>, LaunchRequest, Reservation), GatewayError> {
        let descriptor = self.catalog.descriptor(&signal.app_key).await;
        let kind = descriptor.resolve_backend(signal.stream.as_deref())?;
        let backend = self.backends.get(kind)?;
        let command = descriptor
            .resolve_command(signal.command.as_deref())
            .ok_or_else(|| GatewayError::MissingCommand(signal.app_key.clone()))?;
        let reservation = self.sessions.reserve_for(&signal.instance_id, connection_id)?;

        debug!(
            instance_id = %signal.instance_id,
            backend = %kind,
            command = %preview(&command),
            "[Gateway] dispatching launch"
        );

        let request = LaunchRequest {
            app_key: signal.app_key,
            instance_id: signal.instance_id,
            command,
            owner: connection_id.to_string(),
            events,
        };
        Ok((backend, request, reservation))
    }

    /// Terminate a session. Returns the removed session, `None` if no
    /// session with that id is active. A launch still in flight is cancelled
    /// instead and never registers.
    pub async fn kill(&self, instance_id: &str) -> Option<NativeSession> {
        let Some(session) = self.sessions.remove(instance_id) else {
            if self.sessions.cancel_pending(instance_id) {
                info!(instance_id, "[Gateway] in-flight launch cancelled");
            } else {
                debug!(instance_id, "[Gateway] kill for unknown instance ignored");
            }
            return None;
        };

        match self.backends.get(session.backend) {
            Ok(backend) => {
                if let Err(e) = backend.teardown(&session).await {
                    warn!(instance_id, error = %e, "[Gateway] backend teardown failed");
                }
            }
            Err(e) => warn!(instance_id, error = %e, "[Gateway] no backend for teardown"),
        }

        if let Err(e) = session.process.terminate() {
            warn!(instance_id, pid = session.process.pid, error = %e, "[Gateway] terminate failed");
        }
        info!(instance_id, app_key = %session.app_key, "[Gateway] session killed");
        Some(session)
    }

    // -----------------------------------------------------------------------
    // Exec + authorization
    // -----------------------------------------------------------------------

    /// Gate and run `command` on behalf of a connection. The outcome arrives
    /// later as `exec:result` (or immediately as `uac:required`).
    pub async fn exec(
        &self,
        connection_id: &str,
        command: &str,
    ) -> Result<ExecOutcome, GatewayError> {
        let conn = self
            .connections
            .get(connection_id)
            .await
            .ok_or_else(|| GatewayError::NoConnection(connection_id.to_string()))?;
        self.executor.execute(&conn.auth, command, &conn.sender)
    }

    async fn exec_over_channel(&self, connection_id: &str, command: &str) {
        match self.exec(connection_id, command).await {
            Ok(_) => {}
            Err(e @ GatewayError::PermanentlyBlocked { .. }) => {
                self.connections
                    .send_to(
                        connection_id,
                        ServerEvent::ExecResult {
                            stdout: String::new(),
                            stderr: String::new(),
                            error: Some(e.to_string()),
                            exit_code: None,
                            truncated: false,
                        },
                    )
                    .await;
            }
            Err(e) => warn!(connection_id, error = %e, "[Gateway] exec rejected"),
        }
    }

    pub async fn approve(&self, connection_id: &str) {
        if let Some(conn) = self.connections.get(connection_id).await {
            conn.auth.approve();
            info!(connection_id, "[Gateway] next risky command approved");
        }
    }

    pub async fn deny(&self, connection_id: &str) {
        if let Some(conn) = self.connections.get(connection_id).await {
            conn.auth.deny();
            info!(connection_id, "[Gateway] approval withdrawn");
        }
    }
}

fn report_launch_error(
    events: &ClientSender,
    app_key: String,
    instance_id: String,
    e: GatewayError,
) {
    error!(
        app_key = %app_key,
        instance_id = %instance_id,
        code = e.code(),
        error = %e,
        "[Gateway] launch failed"
    );
    let _ = events.send(ServerEvent::AppError {
        app_key,
        instance_id,
        error: e.to_string(),
    });
}

/// Convenience for callers that need a fresh outbound channel.
pub fn client_channel() -> (ClientSender, mpsc::UnboundedReceiver<ServerEvent>) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use aerodesk_config::StaticAppCatalog;
    use aerodesk_core::AppDescriptor;
    use aerodesk_executor::ShellConfig;
    use aerodesk_sandbox::RiskClassifier;
    use aerodesk_supervisor::{ExecBackend, XpraBackend, XpraConfig};

    fn catalog() -> StaticAppCatalog {
        StaticAppCatalog::new()
            .with(
                "sleeper",
                AppDescriptor {
                    command: Some("sleep 30".into()),
                    stream: Some("exec".into()),
                },
            )
            .with(
                "mystery",
                AppDescriptor {
                    command: Some("true".into()),
                    stream: Some("teleport".into()),
                },
            )
            .with(
                "remote",
                AppDescriptor {
                    command: Some("steam".into()),
                    stream: Some("sunshine".into()),
                },
            )
    }

    /// Manager with only the exec backend installed.
    fn manager() -> ConnectionManager {
        let sessions = NativeSessionRegistry::new();
        let backends = BackendSet::new().with(Arc::new(ExecBackend::new(sessions.clone(), "sh")));
        ConnectionManager::new(
            sessions,
            backends,
            Arc::new(catalog()),
            CommandExecutor::new(RiskClassifier::new(), ShellConfig::default()),
        )
    }

    /// Manager whose xpra binary takes half a second to announce its port.
    #[cfg(unix)]
    fn slow_xpra_manager(dir: &std::path::Path) -> ConnectionManager {
        use std::os::unix::fs::PermissionsExt;

        let bin = dir.join("xpra");
        std::fs::write(&bin, "#!/bin/sh\nsleep 0.5\necho 'port 40100'\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sessions = NativeSessionRegistry::new();
        let xpra = XpraBackend::new(
            sessions.clone(),
            XpraConfig {
                binary: bin.display().to_string(),
                ..XpraConfig::default()
            },
        );
        let catalog = StaticAppCatalog::new().with(
            "gimp",
            AppDescriptor {
                command: Some("gimp".into()),
                stream: Some("xpra".into()),
            },
        );
        ConnectionManager::new(
            sessions,
            BackendSet::new().with(Arc::new(xpra)),
            Arc::new(catalog),
            CommandExecutor::new(RiskClassifier::new(), ShellConfig::default()),
        )
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    async fn connected(
        manager: &ConnectionManager,
    ) -> (String, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, mut rx) = client_channel();
        let id = manager.connect(tx).await;
        match next_event(&mut rx).await {
            ServerEvent::ConnectionReady { connection_id } => assert_eq!(connection_id, id),
            other => panic!("expected connection:ready, got {other:?}"),
        }
        (id, rx)
    }

    fn launch_signal(app_key: &str, instance_id: &str) -> LaunchSignal {
        LaunchSignal {
            app_key: app_key.into(),
            instance_id: instance_id.into(),
            command: None,
            stream: None,
        }
    }

    async fn wait_registered(manager: &ConnectionManager, instance_id: &str) {
        for _ in 0..200 {
            if manager.sessions().contains(instance_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{instance_id} never registered");
    }

    #[tokio::test]
    async fn unknown_backend_is_one_error_and_no_registry_change() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        manager.launch(&id, launch_signal("mystery", "m-1")).await;

        match next_event(&mut rx).await {
            ServerEvent::AppError { instance_id, error, .. } => {
                assert_eq!(instance_id, "m-1");
                assert_eq!(error, "Unknown stream type: teleport");
            }
            other => panic!("expected app:error, got {other:?}"),
        }
        assert!(manager.sessions().is_empty());
        assert!(!manager.sessions().is_reserved("m-1"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn backend_missing_from_set_is_unknown() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        manager.launch(&id, launch_signal("remote", "r-1")).await;

        match next_event(&mut rx).await {
            ServerEvent::AppError { error, .. } => {
                assert_eq!(error, "Unknown stream type: sunshine")
            }
            other => panic!("expected app:error, got {other:?}"),
        }
        assert!(manager.sessions().is_empty());
    }

    #[tokio::test]
    async fn app_without_any_command_is_rejected() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        let mut signal = launch_signal("unlisted", "u-1");
        signal.stream = Some("exec".into());
        manager.launch(&id, signal).await;

        assert!(matches!(next_event(&mut rx).await, ServerEvent::AppError { .. }));
        assert!(manager.sessions().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn duplicate_instance_is_rejected_and_original_kept() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        manager.launch(&id, launch_signal("sleeper", "s-1")).await;
        wait_registered(&manager, "s-1").await;
        let original = manager.sessions().get("s-1").unwrap().process.pid;

        manager.launch(&id, launch_signal("sleeper", "s-1")).await;
        match next_event(&mut rx).await {
            ServerEvent::AppError { instance_id, .. } => assert_eq!(instance_id, "s-1"),
            other => panic!("expected app:error, got {other:?}"),
        }
        assert_eq!(manager.sessions().len(), 1);
        assert_eq!(manager.sessions().get("s-1").unwrap().process.pid, original);

        assert!(manager.kill("s-1").await.is_some());
        assert!(!manager.sessions().contains("s-1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn explicit_kill_cleans_up_once_and_emits_no_exit() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        manager.launch(&id, launch_signal("sleeper", "s-2")).await;
        wait_registered(&manager, "s-2").await;

        manager.handle_signal(&id, ClientSignal::Kill { instance_id: "s-2".into() }).await;
        assert!(manager.sessions().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, ServerEvent::AppExit { .. }), "unexpected {event:?}");
        }
    }

    #[tokio::test]
    async fn killing_an_unknown_instance_is_a_no_op() {
        let manager = manager();
        assert!(manager.kill("nope").await.is_none());
        assert!(manager.sessions().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn disconnect_keeps_sessions_by_default() {
        let manager = manager();
        let (id, _rx) = connected(&manager).await;

        manager.launch(&id, launch_signal("sleeper", "s-3")).await;
        wait_registered(&manager, "s-3").await;

        manager.disconnect(&id).await;
        assert!(manager.sessions().contains("s-3"));
        assert_eq!(manager.connections().len().await, 0);

        manager.kill("s-3").await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn disconnect_kills_owned_sessions_when_enabled() {
        let manager = manager().with_kill_on_disconnect(true);
        let (owner, _rx) = connected(&manager).await;
        let (other, _rx2) = connected(&manager).await;

        manager.launch(&owner, launch_signal("sleeper", "mine")).await;
        manager.launch(&other, launch_signal("sleeper", "theirs")).await;
        wait_registered(&manager, "mine").await;
        wait_registered(&manager, "theirs").await;

        manager.disconnect(&owner).await;
        assert!(!manager.sessions().contains("mine"));
        assert!(manager.sessions().contains("theirs"));

        manager.kill("theirs").await;
    }

    #[tokio::test]
    async fn exec_requires_a_live_connection() {
        let manager = manager();
        let err = manager.exec("ghost", "ls").await.unwrap_err();
        assert!(matches!(err, GatewayError::NoConnection(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn approval_covers_exactly_one_risky_exec() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        let outcome = manager.exec(&id, "kill -0 $$").await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Pending { .. }));
        assert!(matches!(next_event(&mut rx).await, ServerEvent::UacRequired { .. }));

        manager.handle_signal(&id, ClientSignal::Approve).await;
        assert_eq!(manager.exec(&id, "kill -0 $$").await.unwrap(), ExecOutcome::Started);
        match next_event(&mut rx).await {
            ServerEvent::ExecResult { error, .. } => assert_eq!(error, None),
            other => panic!("expected exec:result, got {other:?}"),
        }

        let again = manager.exec(&id, "kill -0 $$").await.unwrap();
        assert!(matches!(again, ExecOutcome::Pending { .. }));
    }

    #[tokio::test]
    async fn deny_withdraws_a_grant() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        manager.approve(&id).await;
        manager.deny(&id).await;

        let outcome = manager.exec(&id, "sudo true").await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Pending { .. }));
        assert!(matches!(next_event(&mut rx).await, ServerEvent::UacRequired { .. }));
    }

    #[tokio::test]
    async fn blocked_exec_over_channel_answers_with_result() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;

        manager.approve(&id).await;
        manager
            .handle_signal(&id, ClientSignal::Exec { command: "rm -rf /".into() })
            .await;

        match next_event(&mut rx).await {
            ServerEvent::ExecResult { error, stdout, .. } => {
                assert_eq!(error.as_deref(), Some("Command permanently blocked"));
                assert!(stdout.is_empty());
            }
            other => panic!("expected exec:result, got {other:?}"),
        }
        // Blocklist refusal does not spend the grant.
        let conn = manager.connections().get(&id).await.unwrap();
        assert!(conn.auth.take());
    }

    #[tokio::test]
    async fn ping_is_answered() {
        let manager = manager();
        let (id, mut rx) = connected(&manager).await;
        manager.handle_signal(&id, ClientSignal::Ping).await;
        assert_eq!(next_event(&mut rx).await, ServerEvent::Pong);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_during_launch_cancels_it() {
        let dir = tempfile::tempdir().unwrap();
        let manager = slow_xpra_manager(dir.path());
        let (id, mut rx) = connected(&manager).await;

        manager.launch(&id, launch_signal("gimp", "g-1")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.sessions().is_reserved("g-1"));

        manager.handle_signal(&id, ClientSignal::Kill { instance_id: "g-1".into() }).await;

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!manager.sessions().contains("g-1"));
        assert!(!manager.sessions().is_reserved("g-1"));
        assert!(rx.try_recv().is_err(), "cancelled launch still reported");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn disconnect_cancels_in_flight_launches_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let manager = slow_xpra_manager(dir.path()).with_kill_on_disconnect(true);
        let (id, _rx) = connected(&manager).await;

        manager.launch(&id, launch_signal("gimp", "g-2")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.disconnect(&id).await;

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(manager.sessions().is_empty());
        assert!(!manager.sessions().is_reserved("g-2"));
    }
}
