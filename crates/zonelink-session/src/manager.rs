//! The session registry: every live session, keyed by id.
//!
//! # Concurrency note
//!
//! The table sits behind one `parking_lot::RwLock`. Lookups take the read
//! side, create/remove take the write side, and the guard is always
//! dropped before anything is awaited: closing a session (which talks to
//! the transport) happens after the entry has left the table.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use zonelink_transport::{Connection, Messenger, SessionId};

use crate::{Session, SessionConfig, SessionError};

/// Tracks all active sessions.
///
/// ## Lifecycle
///
/// ```text
/// allocate_id() ──→ create_session() ──→ reconnect() ──→ remove_session()
///                        │                   │                 │
///                        ▼                   ▼                 ▼
///                     [open]         [open, new control]   [closed, gone]
/// ```
///
/// Constructed explicitly and shared as `Arc<SessionManager<M>>`.
pub struct SessionManager<M: Messenger> {
    sessions: RwLock<HashMap<SessionId, Arc<Session<M>>>>,
    next_id: AtomicU64,
    config: SessionConfig,
}

impl<M: Messenger> SessionManager<M> {
    /// Creates an empty manager. `config` is validated first.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Hands out the next session id. Ids start at 1 and are never reused.
    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a session and registers it under `id`.
    ///
    /// If `id` was already registered the old session is displaced and
    /// closed.
    pub async fn create_session(
        &self,
        messenger: Arc<M>,
        id: SessionId,
        ip: IpAddr,
        control: Option<M::Control>,
    ) -> Arc<Session<M>> {
        let session = Arc::new(Session::new(messenger, id, ip, control, &self.config));

        let displaced = self.sessions.write().insert(id, Arc::clone(&session));
        if let Some(old) = displaced {
            tracing::warn!(session_id = %id, "session id reused, closing displaced session");
            if let Err(e) = old.close().await {
                tracing::debug!(session_id = %id, error = %e, "closing displaced session failed");
            }
        }

        tracing::info!(session_id = %id, %ip, "session created");
        session
    }

    pub fn get_session(&self, id: SessionId) -> Option<Arc<Session<M>>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Looks up a session and checks that `ip` is the address it was
    /// created from.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: no session under `id`
    /// - [`SessionError::IpMismatch`]: the session exists but `ip` differs
    pub fn get_valid_session(&self, id: SessionId, ip: IpAddr) -> Result<Arc<Session<M>>, SessionError> {
        let session = self.get_session(id).ok_or(SessionError::NotFound(id))?;
        if session.ip() != ip {
            tracing::warn!(session_id = %id, expected = %session.ip(), presented = %ip, "ip mismatch");
            return Err(SessionError::IpMismatch { id, presented: ip });
        }
        Ok(session)
    }

    /// Attaches a new control stream to an existing session.
    ///
    /// The session object, its id and its buffers are kept; only the
    /// control handle changes. The previous handle is closed.
    ///
    /// # Errors
    /// Same as [`get_valid_session`](Self::get_valid_session), plus
    /// [`SessionError::Closed`] if the session was closed meanwhile.
    pub async fn reconnect(
        &self,
        id: SessionId,
        ip: IpAddr,
        control: M::Control,
    ) -> Result<Arc<Session<M>>, SessionError> {
        let session = self.get_valid_session(id, ip)?;
        if session.is_closed() {
            return Err(SessionError::Closed(id));
        }

        if let Some(old) = session.replace_control(Some(control)) {
            if let Err(e) = old.close().await {
                tracing::debug!(session_id = %id, error = %e, "closing previous control stream failed");
            }
        }

        tracing::info!(session_id = %id, %ip, "session reconnected");
        Ok(session)
    }

    /// Removes a session and closes it.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if nothing was registered under `id`;
    /// otherwise whatever closing the session returned. The entry is gone
    /// either way.
    pub async fn remove_session(&self, id: SessionId) -> Result<(), SessionError> {
        let session = self.sessions.write().remove(&id).ok_or(SessionError::NotFound(id))?;
        tracing::debug!(session_id = %id, "session removed");
        session.close().await
    }

    /// Records that the session has moved to `zone_id`.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if nothing is registered under `id`.
    pub fn update_zone(&self, id: SessionId, zone_id: u32) -> Result<(), SessionError> {
        let session = self.get_session(id).ok_or(SessionError::NotFound(id))?;
        session.set_zone_id(zone_id);
        tracing::debug!(session_id = %id, zone_id, "zone updated");
        Ok(())
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<Arc<Session<M>>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Removes and closes every session.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let count = drained.len();
        for session in drained {
            if let Err(e) = session.close().await {
                tracing::debug!(session_id = %session.id(), error = %e, "close during shutdown failed");
            }
        }
        tracing::info!(count, "session manager shut down");
    }
}

// =========================================================================
// Tests
// =========================================================================
