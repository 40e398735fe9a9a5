//! Per-connection session state for Zonelink.
//!
//! This crate owns what the server knows about each client:
//!
//! 1. **Session** ([`Session`]): identity, game-facing metadata, and the
//!    scratch buffers and outbound arena used to send on its behalf
//! 2. **Registry** ([`SessionManager`]): the id → session table, with
//!    IP-checked lookup for reconnects
//!
//! # How it fits in the stack
//!
//! ```text
//! Game logic (above)        ← queue_message / queue_datagram from any task
//!     ↕
//! Session Layer (this crate) ← serializes sends per session
//!     ↕
//! Protocol (beside)         ← framing and record headers
//! Transport (below)         ← Messenger delivers the finished bytes
//! ```

#![allow(async_fn_in_trait)]

mod error;
mod manager;
mod session;

pub use error::{BuildError, SessionError};
pub use manager::SessionManager;
pub use session::{Session, SessionConfig, SessionInfo};
