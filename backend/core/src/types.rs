use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Opaque identifier of one client channel.
pub type ConnectionId = String;

/// Opaque, caller-chosen identifier of one native application session.
pub type InstanceId = String;

/// Strategy used to turn a launch request into a reachable running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Run the launch command directly and forward its output.
    Exec,
    /// Remote display server with a dynamically announced HTML port.
    Xpra,
    /// Remote display server on a fixed, well-known port.
    Sunshine,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Exec => "exec",
            BackendKind::Xpra => "xpra",
            BackendKind::Sunshine => "sunshine",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exec" => Ok(BackendKind::Exec),
            "xpra" | "displayA" => Ok(BackendKind::Xpra),
            "sunshine" | "displayB" => Ok(BackendKind::Sunshine),
            other => Err(GatewayError::UnknownBackend(other.to_string())),
        }
    }
}

/// The slice of an installed app's `app.properties.json` the gateway consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

impl AppDescriptor {
    /// Pick the backend for a launch. The server-declared `stream` wins; the
    /// client hint is only consulted when the app declares nothing.
    pub fn resolve_backend(&self, client_hint: Option<&str>) -> Result<BackendKind, GatewayError> {
        let declared = self
            .stream
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| client_hint.filter(|s| !s.trim().is_empty()));

        match declared {
            Some(name) => name.trim().parse(),
            None => Err(GatewayError::UnknownBackend("none".to_string())),
        }
    }

    /// Pick the launch command, server-declared first.
    pub fn resolve_command(&self, client_command: Option<&str>) -> Option<String> {
        self.command
            .as_deref()
            .or(client_command)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_stream_beats_client_hint() {
        let desc = AppDescriptor {
            command: None,
            stream: Some("sunshine".into()),
        };
        assert_eq!(desc.resolve_backend(Some("xpra")).unwrap(), BackendKind::Sunshine);
    }

    #[test]
    fn hint_used_when_app_declares_nothing() {
        let desc = AppDescriptor::default();
        assert_eq!(desc.resolve_backend(Some("displayA")).unwrap(), BackendKind::Xpra);
    }

    #[test]
    fn missing_backend_is_unknown() {
        let err = AppDescriptor::default().resolve_backend(None).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownBackend(ref s) if s == "none"));
    }

    #[test]
    fn unrecognised_backend_is_named() {
        let err = AppDescriptor::default().resolve_backend(Some("vnc")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown stream type: vnc");
    }

    #[test]
    fn declared_command_wins() {
        let desc = AppDescriptor {
            command: Some("gimp".into()),
            stream: None,
        };
        assert_eq!(desc.resolve_command(Some("rm -rf ~")).as_deref(), Some("gimp"));
        assert_eq!(AppDescriptor::default().resolve_command(Some("  ")), None);
    }
}
