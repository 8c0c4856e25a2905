pub mod analysis;
pub mod exec_approval;

pub use analysis::{
    BLOCKED_PATTERNS, RISK_TOKENS, RiskClassifier, RiskDecision, RiskVerdict, classify,
};
pub use exec_approval::{AuthState, AuthorizationState};
