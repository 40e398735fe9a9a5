//! # Zonelink
//!
//! Session and message transport layer for zone-based game servers.
//!
//! Zonelink keeps one [`Session`] per connected client and lets any task
//! send it framed, multi-segment messages over an unreliable datagram
//! channel or a reliable length-prefixed stream, without frames from
//! concurrent producers ever interleaving. Inbound records are routed by
//! opcode through a [`HandlerRegistry`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zonelink::prelude::*;
//!
//! # async fn run() -> Result<(), ZonelinkError> {
//! let config = NetConfig::load("zonelink.toml").await?;
//! zonelink::telemetry::init_tracing(&config.logging)?;
//!
//! let (messenger, _outbound) = ChannelMessenger::new(1024);
//! let manager = SessionManager::new(config.session);
//! let id = manager.allocate_id();
//! let session = manager
//!     .create_session(Arc::new(messenger), id, "127.0.0.1".parse().unwrap(), None)
//!     .await;
//!
//! session
//!     .queue_message(Opcode(0x10), |m| {
//!         m.write_u32(7).write_text("welcome");
//!         Ok::<_, SessionError>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatch;
mod error;
pub mod telemetry;

pub use config::{LoggingConfig, NetConfig};
pub use dispatch::{serve_control_stream, Dispatch, DropReason, HandlerRegistry};
pub use error::{ConfigError, ZonelinkError};

pub use zonelink_protocol as protocol;
pub use zonelink_session as session;
pub use zonelink_transport as transport;

pub use zonelink_session::{Session, SessionConfig, SessionError, SessionInfo, SessionManager};

pub mod prelude {
    pub use crate::{
        serve_control_stream, ConfigError, Dispatch, DropReason, HandlerRegistry, LoggingConfig,
        NetConfig, ZonelinkError,
    };
    pub use zonelink_protocol::{
        Channel, Datagram, FramedMessage, Message, MessageBuilder, MessageReader, Opcode,
        StreamRecord,
    };
    pub use zonelink_session::{Session, SessionConfig, SessionError, SessionManager};
    pub use zonelink_transport::{
        ChannelConnection, ChannelMessenger, Connection, Messenger, SessionId, TransportError,
    };
}
