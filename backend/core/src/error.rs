use thiserror::Error;

/// Top-level error type for the aerodesk gateway.
///
/// Every variant maps onto one outcome a client can observe: either the
/// synchronous accept/reject of a request or an asynchronous channel event.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Blocklist match. Never retryable, never overridable by approval.
    #[error("Command permanently blocked")]
    PermanentlyBlocked { command: String },

    /// Risky command without a standing one-shot grant.
    #[error("authorization required for risky command ({})", risks.join(", "))]
    AuthorizationRequired { command: String, risks: Vec<String> },

    #[error("{0}")]
    SpawnFailure(String),

    #[error("{0}")]
    ParseFailure(String),

    #[error("Unknown stream type: {0}")]
    UnknownBackend(String),

    #[error("teardown failed: {0}")]
    TeardownFailure(String),

    #[error("instance {0} is already running")]
    DuplicateInstance(String),

    #[error("no launch command configured for app {0}")]
    MissingCommand(String),

    #[error("No active session")]
    NoConnection(String),

    /// The instance was killed while its launch was still in flight.
    #[error("launch of {0} was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Short machine-readable code, used in logs and error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::PermanentlyBlocked { .. } => "permanently_blocked",
            GatewayError::AuthorizationRequired { .. } => "authorization_required",
            GatewayError::SpawnFailure(_) => "spawn_failure",
            GatewayError::ParseFailure(_) => "parse_failure",
            GatewayError::UnknownBackend(_) => "unknown_backend",
            GatewayError::TeardownFailure(_) => "teardown_failure",
            GatewayError::DuplicateInstance(_) => "duplicate_instance",
            GatewayError::MissingCommand(_) => "missing_command",
            GatewayError::NoConnection(_) => "no_connection",
            GatewayError::Cancelled(_) => "cancelled",
            GatewayError::Other(_) => "internal",
        }
    }
}
