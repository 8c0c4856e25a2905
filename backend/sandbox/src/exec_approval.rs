//! One-shot exec authorization, scoped to a single connection.
//!
//! `Idle -> Approved` on an explicit approve signal; every execution attempt
//! that gets past the blocklist reads-and-resets the flag, so a grant covers
//! exactly one subsequent command.
use std::sync::atomic::{AtomicBool, Ordering};

use aerodesk_core::GatewayError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::RiskDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Idle,
    Approved,
}

#[derive(Debug, Default)]
pub struct AuthorizationState {
    approved: AtomicBool,
}

impl AuthorizationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self) {
        self.approved.store(true, Ordering::SeqCst);
        debug!("[Auth] grant armed");
    }

    pub fn deny(&self) {
        self.approved.store(false, Ordering::SeqCst);
        debug!("[Auth] grant cleared");
    }

    pub fn state(&self) -> AuthState {
        if self.approved.load(Ordering::SeqCst) {
            AuthState::Approved
        } else {
            AuthState::Idle
        }
    }

    /// Consume the grant, returning whether one was standing.
    pub fn take(&self) -> bool {
        self.approved.swap(false, Ordering::SeqCst)
    }

    /// Gate one execution attempt.
    ///
    /// Blocked commands are refused without touching the grant. Anything else
    /// consumes it; a risky command without a grant is refused with
    /// [`GatewayError::AuthorizationRequired`].
    pub fn authorize(&self, command: &str, decision: &RiskDecision) -> Result<(), GatewayError> {
        if decision.blocked {
            warn!(
                pattern = ?decision.blocked_by,
                "[Auth] command permanently blocked"
            );
            return Err(GatewayError::PermanentlyBlocked {
                command: command.to_string(),
            });
        }

        let granted = self.take();
        if decision.is_risky() && !granted {
            info!(risks = ?decision.risky_tokens, "[Auth] authorization required");
            return Err(GatewayError::AuthorizationRequired {
                command: command.to_string(),
                risks: decision.risky_tokens.clone(),
            });
        }

        if granted && decision.is_risky() {
            info!(risks = ?decision.risky_tokens, "[Auth] one-shot grant used");
        }
        Ok(())
    }
}
