//! Live connection registry.
//!
//! Tracks connected clients, their outbound sender, and their one-shot
//! authorization state.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use aerodesk_core::{ClientSender, ConnectionId, ServerEvent};
use aerodesk_sandbox::AuthorizationState;

/// One live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub sender: ClientSender,
    pub auth: Arc<AuthorizationState>,
}

impl ConnectionHandle {
    fn new(sender: ClientSender) -> Self {
        Self {
            sender,
            auth: Arc::new(AuthorizationState::new()),
        }
    }

    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Manages active channel connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with a fresh (idle) authorization state.
    pub async fn register(&self, id: ConnectionId, sender: ClientSender) -> ConnectionHandle {
        let handle = ConnectionHandle::new(sender);
        let mut w = self.connections.write().await;
        w.insert(id, handle.clone());
        handle
    }

    /// Unregister a disconnected connection.
    pub async fn unregister(&self, id: &str) -> Option<ConnectionHandle> {
        let mut w = self.connections.write().await;
        w.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<ConnectionHandle> {
        let r = self.connections.read().await;
        r.get(id).cloned()
    }

    /// Send an event to a specific connection.
    pub async fn send_to(&self, id: &str, event: ServerEvent) -> bool {
        match self.get(id).await {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerodesk_sandbox::AuthState;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn register_send_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.register("c1".into(), tx).await;
        assert!(registry.send_to("c1", ServerEvent::Pong).await);
        assert_eq!(rx.recv().await, Some(ServerEvent::Pong));

        assert!(registry.unregister("c1").await.is_some());
        assert!(!registry.send_to("c1", ServerEvent::Pong).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn each_connection_has_its_own_grant() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.register("a".into(), tx.clone()).await;
        let b = registry.register("b".into(), tx).await;

        a.auth.approve();
        assert_eq!(a.auth.state(), AuthState::Approved);
        assert_eq!(b.auth.state(), AuthState::Idle);

        // Lookups share the same state as the handle returned at registration.
        let again = registry.get("a").await.unwrap();
        assert!(again.auth.take());
        assert_eq!(a.auth.state(), AuthState::Idle);
    }
}
