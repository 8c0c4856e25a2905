//! Channel protocol for the aerodesk gateway.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}` with camelCase payload fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{BackendKind, ConnectionId, InstanceId};

/// Outbound half of a connection, as handed to every component that emits.
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSignal {
    pub app_key: String,
    pub instance_id: InstanceId,
    #[serde(default)]
    pub command: Option<String>,
    /// Client-side backend hint, honoured only when the app declares none.
    #[serde(default)]
    pub stream: Option<String>,
}

/// Client -> Server signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSignal {
    Launch(LaunchSignal),
    Kill { instance_id: InstanceId },
    Exec { command: String },
    Approve,
    Deny,
    Ping,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KillData {
    instance_id: InstanceId,
}

#[derive(Deserialize)]
struct ExecData {
    command: String,
}

impl ClientSignal {
    /// Decode one text frame. Unit signals accept a missing, null or empty `data`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let Envelope { event, data } = serde_json::from_str(text)?;
        let signal = match event.as_str() {
            "native:launch" => ClientSignal::Launch(serde_json::from_value(data)?),
            "native:kill" => {
                let KillData { instance_id } = serde_json::from_value(data)?;
                ClientSignal::Kill { instance_id }
            }
            "exec" => {
                let ExecData { command } = serde_json::from_value(data)?;
                ClientSignal::Exec { command }
            }
            "uac:approve" => ClientSignal::Approve,
            "uac:deny" => ClientSignal::Deny,
            "ping" => ClientSignal::Ping,
            other => {
                return Err(serde::de::Error::custom(format!("unknown event `{other}`")));
            }
        };
        Ok(signal)
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Server -> Client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connection:ready", rename_all = "camelCase")]
    ConnectionReady { connection_id: ConnectionId },

    #[serde(rename = "uac:required")]
    UacRequired { command: String, risks: Vec<String> },

    #[serde(rename = "exec:result", rename_all = "camelCase")]
    ExecResult {
        stdout: String,
        stderr: String,
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default)]
        truncated: bool,
    },

    #[serde(rename = "app:stream", rename_all = "camelCase")]
    AppStream {
        instance_id: InstanceId,
        app_key: String,
        #[serde(rename = "type")]
        backend: BackendKind,
        url: String,
    },

    #[serde(rename = "app:error", rename_all = "camelCase")]
    AppError {
        app_key: String,
        instance_id: InstanceId,
        error: String,
    },

    #[serde(rename = "app:output", rename_all = "camelCase")]
    AppOutput {
        app_key: String,
        instance_id: InstanceId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
    },

    #[serde(rename = "app:exit", rename_all = "camelCase")]
    AppExit {
        app_key: String,
        instance_id: InstanceId,
        code: Option<i32>,
    },

    #[serde(rename = "pong")]
    Pong,
}

impl ServerEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionReady { .. } => "connection:ready",
            ServerEvent::UacRequired { .. } => "uac:required",
            ServerEvent::ExecResult { .. } => "exec:result",
            ServerEvent::AppStream { .. } => "app:stream",
            ServerEvent::AppError { .. } => "app:error",
            ServerEvent::AppOutput { .. } => "app:output",
            ServerEvent::AppExit { .. } => "app:exit",
            ServerEvent::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_launch_signal() {
        let text = r#"{"event":"native:launch","data":{"appKey":"gimp","instanceId":"gimp-1","command":"gimp","stream":"xpra"}}"#;
        let signal = ClientSignal::parse(text).unwrap();
        assert_eq!(
            signal,
            ClientSignal::Launch(LaunchSignal {
                app_key: "gimp".into(),
                instance_id: "gimp-1".into(),
                command: Some("gimp".into()),
                stream: Some("xpra".into()),
            })
        );
    }

    #[test]
    fn unit_signals_accept_empty_or_missing_data() {
        assert_eq!(
            ClientSignal::parse(r#"{"event":"uac:approve","data":{}}"#).unwrap(),
            ClientSignal::Approve
        );
        assert_eq!(
            ClientSignal::parse(r#"{"event":"uac:deny"}"#).unwrap(),
            ClientSignal::Deny
        );
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(ClientSignal::parse(r#"{"event":"fs:delete","data":{}}"#).is_err());
        assert!(ClientSignal::parse(r#"{"event":"native:kill","data":{}}"#).is_err());
    }

    #[test]
    fn stream_event_wire_shape() {
        let event = ServerEvent::AppStream {
            instance_id: "gimp-1".into(),
            app_key: "gimp".into(),
            backend: BackendKind::Xpra,
            url: "http://localhost:54321".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "app:stream",
                "data": {
                    "instanceId": "gimp-1",
                    "appKey": "gimp",
                    "type": "xpra",
                    "url": "http://localhost:54321"
                }
            })
        );
    }

    #[test]
    fn output_event_omits_absent_stream() {
        let event = ServerEvent::AppOutput {
            app_key: "top".into(),
            instance_id: "top-1".into(),
            stdout: Some("hello\n".into()),
            stderr: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "app:output");
        assert!(value["data"].get("stderr").is_none());
    }

    #[test]
    fn exec_result_carries_null_error() {
        let event = ServerEvent::ExecResult {
            stdout: "ok\n".into(),
            stderr: String::new(),
            error: None,
            exit_code: Some(0),
            truncated: false,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value["data"]["error"].is_null());
        assert_eq!(value["data"]["exitCode"], 0);
    }
}
