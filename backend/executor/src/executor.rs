use std::sync::Arc;

use tracing::{error, info, warn};

use aerodesk_core::{ClientSender, GatewayError, ServerEvent};
use aerodesk_sandbox::{AuthorizationState, RiskClassifier};

use crate::shell::{run_shell, ShellConfig, ShellOutput};

/// Immediate answer to an exec request. The command's result always arrives
/// later as an `exec:result` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command passed the gate and a shell was spawned.
    Started,
    /// An `uac:required` event was sent; resubmit after approval.
    Pending { risks: Vec<String> },
}

/// The Executor classifies a command, applies the connection's one-shot
/// grant, and runs allowed commands in the background.
#[derive(Clone)]
pub struct CommandExecutor {
    classifier: Arc<RiskClassifier>,
    shell: ShellConfig,
}

impl CommandExecutor {
    pub fn new(classifier: RiskClassifier, shell: ShellConfig) -> Self {
        Self {
            classifier: Arc::new(classifier),
            shell,
        }
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// Gate and (maybe) start `command` for one connection.
    ///
    /// Returns `Err(PermanentlyBlocked)` for blocklisted commands; nothing is
    /// spawned and `auth` is left as it was.
    pub fn execute(
        &self,
        auth: &AuthorizationState,
        command: &str,
        events: &ClientSender,
    ) -> Result<ExecOutcome, GatewayError> {
        let decision = self.classifier.classify(command);

        match auth.authorize(command, &decision) {
            Ok(()) => {}
            Err(GatewayError::AuthorizationRequired { command, risks }) => {
                let _ = events.send(ServerEvent::UacRequired {
                    command,
                    risks: risks.clone(),
                });
                return Ok(ExecOutcome::Pending { risks });
            }
            Err(e) => return Err(e),
        }

        info!(command = %preview(command), "[Executor] running");

        let command = command.to_string();
        let shell = self.shell.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let event = match run_shell(&command, &shell).await {
                Ok(output) => result_event(&command, output),
                Err(e) => {
                    error!(error = %e, "[Executor] failed to spawn shell");
                    ServerEvent::ExecResult {
                        stdout: String::new(),
                        stderr: String::new(),
                        error: Some(format!("Failed to spawn {}: {}", shell.shell, e)),
                        exit_code: None,
                        truncated: false,
                    }
                }
            };
            if events.send(event).is_err() {
                warn!("[Executor] connection closed before result was delivered");
            }
        });

        Ok(ExecOutcome::Started)
    }
}

fn result_event(command: &str, output: ShellOutput) -> ServerEvent {
    let error = if output.success {
        None
    } else {
        Some(match output.exit_code {
            Some(code) => format!("Command failed with exit code {}: {}", code, preview(command)),
            None => format!("Command terminated by signal: {}", preview(command)),
        })
    };
    if let Some(e) = &error {
        warn!(error = %e, "[Executor] command failed");
    }

    ServerEvent::ExecResult {
        stdout: output.stdout,
        stderr: output.stderr,
        error,
        exit_code: output.exit_code,
        truncated: output.truncated,
    }
}

/// First 120 characters of a command, for logs and messages.
pub fn preview(command: &str) -> String {
    let mut out: String = command.chars().take(120).collect();
    if command.chars().count() > 120 {
        out.push('…');
    }
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use aerodesk_sandbox::AuthState;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn executor() -> CommandExecutor {
        CommandExecutor::new(RiskClassifier::new(), ShellConfig::default())
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn safe_command_emits_one_result() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = AuthorizationState::new();

        let outcome = executor().execute(&auth, "echo hello", &tx).unwrap();
        assert_eq!(outcome, ExecOutcome::Started);

        match next_event(&mut rx).await {
            ServerEvent::ExecResult { stdout, error, .. } => {
                assert_eq!(stdout, "hello\n");
                assert!(error.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn blocked_command_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = AuthorizationState::new();
        auth.approve();

        let cmd = format!("touch {} && mkfs.ext4 /dev/null", marker.display());
        let err = executor().execute(&auth, &cmd, &tx).unwrap_err();
        assert!(matches!(err, GatewayError::PermanentlyBlocked { .. }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
        assert!(rx.try_recv().is_err());
        assert_eq!(auth.state(), AuthState::Approved);
    }

    #[tokio::test]
    async fn risky_command_waits_for_approval_then_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("log");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = AuthorizationState::new();
        let exec = executor();
        let cmd = format!("echo rm >> {}", marker.display());

        let outcome = exec.execute(&auth, &cmd, &tx).unwrap();
        assert!(matches!(outcome, ExecOutcome::Pending { ref risks } if risks.contains(&"rm".to_string())));
        match next_event(&mut rx).await {
            ServerEvent::UacRequired { command, risks } => {
                assert_eq!(command, cmd);
                assert!(risks.contains(&"rm".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!marker.exists());

        auth.approve();
        assert_eq!(exec.execute(&auth, &cmd, &tx).unwrap(), ExecOutcome::Started);
        assert_eq!(auth.state(), AuthState::Idle);
        assert!(matches!(next_event(&mut rx).await, ServerEvent::ExecResult { error: None, .. }));

        let contents = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn two_risky_commands_need_two_approvals() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = AuthorizationState::new();
        let exec = executor();

        auth.approve();
        assert_eq!(exec.execute(&auth, "echo chmod", &tx).unwrap(), ExecOutcome::Started);
        let _ = next_event(&mut rx).await;

        let second = exec.execute(&auth, "echo chmod", &tx).unwrap();
        assert!(matches!(second, ExecOutcome::Pending { .. }));
        assert!(matches!(next_event(&mut rx).await, ServerEvent::UacRequired { .. }));
    }

    #[tokio::test]
    async fn failure_is_reported_in_result() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let auth = AuthorizationState::new();

        executor().execute(&auth, "echo oops 1>&2; exit 4", &tx).unwrap();
        match next_event(&mut rx).await {
            ServerEvent::ExecResult { stderr, error, exit_code, .. } => {
                assert_eq!(stderr, "oops\n");
                assert_eq!(exit_code, Some(4));
                assert!(error.unwrap().contains("exit code 4"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn preview_truncates_long_commands() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), 121);
        assert_eq!(preview("ls"), "ls");
    }
}
