//! Core types shared by every aerodesk crate: error taxonomy, wire protocol,
//! and the app/backend vocabulary.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::GatewayError;
pub use protocol::{ClientSender, ClientSignal, LaunchSignal, ServerEvent};
pub use types::{AppDescriptor, BackendKind, ConnectionId, InstanceId};
