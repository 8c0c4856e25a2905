//! Native session registry: the single authoritative map from instance id to
//! the running session that serves it.
//!
//! Ids go through two phases. A launch first *reserves* its id (and, for
//! display backends, a display slot) before anything is spawned, then *puts*
//! the finished session once the backend is reachable. A reservation dropped
//! without a put releases the id again, so failed launches leave no trace.
//! A reservation cancelled before its put (kill or disconnect mid-launch)
//! refuses the put, and the backend abandons its child.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use aerodesk_core::{BackendKind, ConnectionId, GatewayError, InstanceId};

use crate::process::ProcessHandle;

/// Identifies one launch of an instance id. Cleanup paths compare tokens so a
/// late exit of an old process can never remove a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeSession {
    pub instance_id: InstanceId,
    pub app_key: String,
    #[serde(rename = "type")]
    pub backend: BackendKind,
    pub process: ProcessHandle,
    /// Set once the backend is reachable.
    pub stream_url: Option<String>,
    /// Display the xpra server is bound to, e.g. `:100`.
    pub display: Option<String>,
    /// Connection that launched the session.
    pub owner: ConnectionId,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    token: SessionToken,
    #[serde(skip)]
    display_slot: Option<u32>,
}

impl NativeSession {
    pub fn token(&self) -> SessionToken {
        self.token
    }
}

/// Fields a backend supplies when it registers a session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub app_key: String,
    pub backend: BackendKind,
    pub pid: u32,
    /// `pid` leads its own process group; signals go to the whole group.
    pub process_group: bool,
    pub stream_url: Option<String>,
    pub owner: ConnectionId,
}

#[derive(Debug)]
struct Pending {
    token: SessionToken,
    display_slot: Option<u32>,
    owner: Option<ConnectionId>,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<InstanceId, NativeSession>,
    pending: HashMap<InstanceId, Pending>,
    next_token: u64,
}

impl Inner {
    fn displays_in_use(&self) -> BTreeSet<u32> {
        self.sessions
            .values()
            .filter_map(|s| s.display_slot)
            .chain(self.pending.values().filter_map(|p| p.display_slot))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NativeSessionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl NativeSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `instance_id` for a new launch. Fails while the id is active or
    /// another launch of it is still in flight.
    pub fn reserve(&self, instance_id: &str) -> Result<Reservation, GatewayError> {
        self.claim(instance_id, None)
    }

    /// Like [`reserve`](Self::reserve), remembering which connection asked so
    /// a disconnect can cancel the launch before it registers.
    pub fn reserve_for(&self, instance_id: &str, owner: &str) -> Result<Reservation, GatewayError> {
        self.claim(instance_id, Some(owner.to_string()))
    }

    fn claim(&self, instance_id: &str, owner: Option<ConnectionId>) -> Result<Reservation, GatewayError> {
        let mut inner = self.lock();
        if inner.sessions.contains_key(instance_id) || inner.pending.contains_key(instance_id) {
            return Err(GatewayError::DuplicateInstance(instance_id.to_string()));
        }
        inner.next_token += 1;
        let token = SessionToken(inner.next_token);
        inner.pending.insert(
            instance_id.to_string(),
            Pending {
                token,
                display_slot: None,
                owner,
                cancelled: false,
            },
        );
        debug!(instance_id, "[Registry] reserved");

        Ok(Reservation {
            registry: self.clone(),
            instance_id: instance_id.to_string(),
            token,
            committed: false,
        })
    }

    pub fn get(&self, instance_id: &str) -> Option<NativeSession> {
        self.lock().sessions.get(instance_id).cloned()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.lock().sessions.contains_key(instance_id)
    }

    pub fn is_reserved(&self, instance_id: &str) -> bool {
        self.lock().pending.contains_key(instance_id)
    }

    /// Mark an in-flight launch as cancelled. Its put will be refused. Returns
    /// `false` when no launch of `instance_id` is pending.
    pub fn cancel_pending(&self, instance_id: &str) -> bool {
        match self.lock().pending.get_mut(instance_id) {
            Some(pending) => {
                pending.cancelled = true;
                info!(instance_id, "[Registry] pending launch cancelled");
                true
            }
            None => false,
        }
    }

    /// In-flight launches requested by `owner`.
    pub fn pending_owned_by(&self, owner: &str) -> Vec<InstanceId> {
        self.lock()
            .pending
            .iter()
            .filter(|(_, p)| p.owner.as_deref() == Some(owner) && !p.cancelled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove unconditionally. Used by explicit kill.
    pub fn remove(&self, instance_id: &str) -> Option<NativeSession> {
        let removed = self.lock().sessions.remove(instance_id);
        if removed.is_some() {
            info!(instance_id, "[Registry] removed");
        }
        removed
    }

    /// Remove only if the entry still belongs to the launch identified by `token`.
    pub fn remove_if_current(&self, instance_id: &str, token: SessionToken) -> Option<NativeSession> {
        let mut inner = self.lock();
        match inner.sessions.get(instance_id) {
            Some(s) if s.token == token => {
                info!(instance_id, "[Registry] removed after process exit");
                inner.sessions.remove(instance_id)
            }
            _ => None,
        }
    }

    /// Record readiness. Returns the updated session, or `None` if it is gone.
    pub fn set_stream_url(
        &self,
        instance_id: &str,
        token: SessionToken,
        url: &str,
    ) -> Option<NativeSession> {
        let mut inner = self.lock();
        let session = inner.sessions.get_mut(instance_id).filter(|s| s.token == token)?;
        session.stream_url = Some(url.to_string());
        Some(session.clone())
    }

    /// Snapshot ordered by start time.
    pub fn list(&self) -> Vec<NativeSession> {
        let mut sessions: Vec<_> = self.lock().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        sessions
    }

    pub fn owned_by(&self, owner: &str) -> Vec<InstanceId> {
        self.lock()
            .sessions
            .values()
            .filter(|s| s.owner == owner)
            .map(|s| s.instance_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-flight claim on an instance id.
#[derive(Debug)]
pub struct Reservation {
    registry: NativeSessionRegistry,
    instance_id: InstanceId,
    token: SessionToken,
    committed: bool,
}

impl Reservation {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Claim the lowest display number `>= base` that no active or in-flight
    /// session holds.
    pub fn allocate_display(&mut self, base: u32) -> u32 {
        let mut inner = self.registry.lock();
        let in_use = inner.displays_in_use();
        let slot = (base..).find(|n| !in_use.contains(n)).unwrap_or(base);
        if let Some(pending) = inner.pending.get_mut(&self.instance_id) {
            pending.display_slot = Some(slot);
        }
        slot
    }

    /// Register the running session under the reserved id. Fails with
    /// [`GatewayError::Cancelled`] if the launch was cancelled meanwhile; the
    /// id is released when `self` drops.
    pub fn put(mut self, spec: SessionSpec) -> Result<NativeSession, GatewayError> {
        let session = {
            let mut inner = self.registry.lock();
            let cancelled = inner
                .pending
                .get(&self.instance_id)
                .is_some_and(|p| p.token == self.token && p.cancelled);
            if cancelled {
                None
            } else {
                let display_slot = inner
                    .pending
                    .remove(&self.instance_id)
                    .and_then(|p| p.display_slot);
                let process = if spec.process_group {
                    ProcessHandle::group_leader(spec.pid)
                } else {
                    ProcessHandle::new(spec.pid)
                };
                let session = NativeSession {
                    instance_id: self.instance_id.clone(),
                    app_key: spec.app_key,
                    backend: spec.backend,
                    process,
                    stream_url: spec.stream_url,
                    display: display_slot.map(|n| format!(":{n}")),
                    owner: spec.owner,
                    started_at: Utc::now(),
                    token: self.token,
                    display_slot,
                };
                inner.sessions.insert(self.instance_id.clone(), session.clone());
                Some(session)
            }
        };

        let Some(session) = session else {
            debug!(instance_id = %self.instance_id, "[Registry] put refused, launch cancelled");
            return Err(GatewayError::Cancelled(self.instance_id.clone()));
        };
        self.committed = true;

        info!(
            instance_id = %session.instance_id,
            app_key = %session.app_key,
            backend = %session.backend,
            pid = session.process.pid,
            "[Registry] registered"
        );
        Ok(session)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut inner = self.registry.lock();
        if inner
            .pending
            .get(&self.instance_id)
            .is_some_and(|p| p.token == self.token)
        {
            inner.pending.remove(&self.instance_id);
            debug!(instance_id = %self.instance_id, "[Registry] reservation released");
        }
    }
}
