//! CLI Classify Command
//!
//! Shows how the gateway would gate a command, without running it.

use anyhow::Result;

use aerodesk_config::AeroConfig;
use aerodesk_sandbox::{RiskClassifier, RiskVerdict};

use crate::terminal_output::{note_error, note_success, note_warn};

pub fn run(command: &str, config: &AeroConfig, json: bool) -> Result<()> {
    let classifier = RiskClassifier::with_extra(
        &config.security.extra_blocked,
        &config.security.extra_risk_tokens,
    );
    let decision = classifier.classify(command);

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    match decision.verdict() {
        RiskVerdict::Allowed => note_success("Allowed: runs immediately"),
        RiskVerdict::RequiresAuthorization => note_warn(&format!(
            "Requires approval (matched: {})",
            decision.risky_tokens.join(", ")
        )),
        RiskVerdict::Blocked => note_error(&format!(
            "Permanently blocked (pattern: {})",
            decision.blocked_by.as_deref().unwrap_or("?")
        )),
    }
    Ok(())
}
