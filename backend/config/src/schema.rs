//! aerodesk runtime configuration schema.
//!
//! Every section and field has a default, so an empty or missing file is a
//! complete configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AeroConfig {
    pub gateway: GatewayConfig,
    pub apps: AppsConfig,
    pub exec: ExecConfig,
    pub security: SecurityConfig,
    pub xpra: XpraSection,
    pub sunshine: SunshineSection,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

// ---------------------------------------------------------------------------
// Apps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppsConfig {
    /// Root holding one `<appKey>/app.properties.json` per installed app.
    pub dir: PathBuf,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("public/apps"),
        }
    }
}

// ---------------------------------------------------------------------------
// Exec + security
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecConfig {
    pub shell: String,
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            max_output_bytes: 200_000,
        }
    }
}

/// Operator extensions to the built-in blocklist and risk tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub extra_blocked: Vec<String>,
    pub extra_risk_tokens: Vec<String>,
}

// ---------------------------------------------------------------------------
// Display backends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct XpraSection {
    pub binary: String,
    pub base_display: u32,
    pub ready_timeout_secs: u64,
}

impl Default for XpraSection {
    fn default() -> Self {
        Self {
            binary: "xpra".to_string(),
            base_display: 100,
            ready_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SunshineSection {
    pub binary: String,
    pub url: String,
    pub settle_delay_ms: u64,
}

impl Default for SunshineSection {
    fn default() -> Self {
        Self {
            binary: "sunshine".to_string(),
            url: "http://localhost:47989".to_string(),
            settle_delay_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions + logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionsConfig {
    /// Kill a connection's native sessions when it disconnects.
    pub kill_on_disconnect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily-rolling NDJSON logs. Console only when unset.
    pub dir: Option<PathBuf>,
    /// JSON console output instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}
