//! Inbound routing: opcode → handler.
//!
//! Each received record carries an opcode and a framed payload. The
//! [`HandlerRegistry`] looks the opcode up and runs the matching handler,
//! after two gates:
//!
//! 1. Records with no payload are dropped.
//! 2. Opcodes not registered as *public* are dropped until the session
//!    has authenticated.
//!
//! Drops are not errors: they are logged at debug level and reported as
//! a [`Dispatch::Dropped`] so tests and metrics can see them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use zonelink_protocol::{Datagram, Opcode, ProtocolError, StreamRecord};
use zonelink_session::{Session, SessionError};
use zonelink_transport::{Connection, Messenger};

use crate::ZonelinkError;

type HandlerFn<M> =
    dyn Fn(Arc<Session<M>>, Vec<u8>) -> BoxFuture<'static, Result<(), ZonelinkError>> + Send + Sync;

struct Route<M: Messenger> {
    handler: Box<HandlerFn<M>>,
    public: bool,
}

/// What happened to one inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran and succeeded.
    Handled,
    /// The record was dropped without running a handler.
    Dropped(DropReason),
}

/// Why a record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than the 2-byte opcode.
    TooShort,
    /// An opcode with no payload.
    EmptyPayload,
    /// A non-public opcode from a session that hasn't authenticated.
    Unauthenticated,
    /// No handler is registered for the opcode.
    UnknownOpcode,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::TooShort => "too short",
            Self::EmptyPayload => "empty payload",
            Self::Unauthenticated => "unauthenticated",
            Self::UnknownOpcode => "unknown opcode",
        };
        f.write_str(text)
    }
}

/// Maps opcodes to async handlers.
///
/// Handlers receive the session and an owned copy of the payload (the
/// framed message after the opcode). Decode it with
/// [`Session::read_message`] or [`zonelink_protocol::unmarshal`].
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register_public(LOGIN, |session, payload| async move {
///     let account = session.read_message(&payload, |m| {
///         MessageReader::new(&m).read_i64()
///     }).await??;
///     session.authenticate(account);
///     Ok(())
/// });
/// ```
pub struct HandlerRegistry<M: Messenger> {
    routes: HashMap<Opcode, Route<M>>,
}

impl<M: Messenger> HandlerRegistry<M> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Registers a handler that only runs for authenticated sessions.
    /// Replaces any previous handler for `opcode`.
    pub fn register<F, Fut>(&mut self, opcode: Opcode, handler: F)
    where
        F: Fn(Arc<Session<M>>, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ZonelinkError>> + Send + 'static,
    {
        self.insert(opcode, handler, false);
    }

    /// Registers a handler that also runs before authentication, such
    /// as a login request.
    pub fn register_public<F, Fut>(&mut self, opcode: Opcode, handler: F)
    where
        F: Fn(Arc<Session<M>>, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ZonelinkError>> + Send + 'static,
    {
        self.insert(opcode, handler, true);
    }

    fn insert<F, Fut>(&mut self, opcode: Opcode, handler: F, public: bool)
    where
        F: Fn(Arc<Session<M>>, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ZonelinkError>> + Send + 'static,
    {
        let handler: Box<HandlerFn<M>> =
            Box::new(move |session, payload| handler(session, payload).boxed());
        if self.routes.insert(opcode, Route { handler, public }).is_some() {
            tracing::warn!(%opcode, "handler replaced");
        }
    }

    /// Whether `opcode` is accepted before authentication.
    pub fn is_public(&self, opcode: Opcode) -> bool {
        self.routes.get(&opcode).is_some_and(|r| r.public)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Parses and dispatches one received datagram.
    ///
    /// # Errors
    /// Whatever the handler returned.
    pub async fn handle_datagram(
        &self,
        session: &Arc<Session<M>>,
        data: &[u8],
    ) -> Result<Dispatch, ZonelinkError> {
        match Datagram::parse(data) {
            Ok(datagram) => self.dispatch(session, datagram.opcode, datagram.payload).await,
            Err(_) => {
                tracing::debug!(session_id = %session.id(), len = data.len(), "datagram too short");
                Ok(Dispatch::Dropped(DropReason::TooShort))
            }
        }
    }

    /// Dispatches one record that has already been split into opcode and
    /// payload.
    pub async fn dispatch(
        &self,
        session: &Arc<Session<M>>,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<Dispatch, ZonelinkError> {
        let authenticated = session.is_authenticated();
        let verdict = if payload.is_empty() {
            Err(DropReason::EmptyPayload)
        } else {
            match self.routes.get(&opcode) {
                Some(route) if route.public || authenticated => Ok(route),
                _ if !authenticated => Err(DropReason::Unauthenticated),
                _ => Err(DropReason::UnknownOpcode),
            }
        };

        match verdict {
            Ok(route) => {
                (route.handler)(Arc::clone(session), payload.to_vec()).await?;
                Ok(Dispatch::Handled)
            }
            Err(reason) => {
                tracing::debug!(session_id = %session.id(), %opcode, %reason, "record dropped");
                Ok(Dispatch::Dropped(reason))
            }
        }
    }
}

impl<M: Messenger> Default for HandlerRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads stream records from the session's control stream and dispatches
/// each one until the stream ends.
///
/// A chunk may hold several records or part of one; records are
/// reassembled before dispatch. Handler errors are logged and the loop
/// carries on, except [`SessionError::Closed`], which ends it.
///
/// Returns `Ok(())` on a clean end of stream or when the session has no
/// control stream attached.
///
/// # Errors
/// A transport error from the stream, or a malformed or oversized record.
pub async fn serve_control_stream<M: Messenger>(
    session: Arc<Session<M>>,
    registry: Arc<HandlerRegistry<M>>,
) -> Result<(), ZonelinkError> {
    let Some(control) = session.control() else {
        return Ok(());
    };
    let max_record = session.max_record_bytes();
    let mut pending: Vec<u8> = Vec::new();
    tracing::debug!(session_id = %session.id(), conn_id = %control.id(), "control stream started");

    while let Some(chunk) = control.recv().await? {
        pending.extend_from_slice(&chunk);

        let mut consumed = 0;
        while let Some((record, used)) = next_record(&pending[consumed..], max_record)? {
            consumed += used;
            match registry.dispatch(&session, record.opcode, record.payload).await {
                Ok(_) => {}
                Err(ZonelinkError::Session(SessionError::Closed(_))) => {
                    tracing::debug!(session_id = %session.id(), "session closed, ending control stream");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(
                        session_id = %session.id(),
                        opcode = %record.opcode,
                        error = %e,
                        "handler failed"
                    );
                }
            }
        }
        pending.drain(..consumed);
    }

    tracing::debug!(session_id = %session.id(), "control stream ended");
    Ok(())
}

/// Splits the first complete record off `data`, rejecting one whose
/// announced length exceeds `max_record` before its body arrives.
fn next_record(data: &[u8], max_record: usize) -> Result<Option<(StreamRecord<'_>, usize)>, ProtocolError> {
    if data.len() >= 4 {
        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > max_record {
            return Err(ProtocolError::RecordTooLarge { len, max: max_record });
        }
    }
    StreamRecord::parse_prefix(data)
}
