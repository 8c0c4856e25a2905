//! aerodesk gateway
//!
//! The connection session manager plus its transports: a WebSocket channel
//! per client and a small HTTP surface.

pub mod connection_manager;
pub mod server;
pub mod session_registry;
pub mod ws_server;

pub use connection_manager::{ConnectionManager, client_channel};
pub use server::{CONNECTION_HEADER, GatewayState, build_router, start_server};
pub use session_registry::{ConnectionHandle, ConnectionRegistry};
