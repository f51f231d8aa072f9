// ABOUTME: Main library entry point for the MEW protocol gateway
// ABOUTME: A multi-participant coordination space with capability-scoped routing

//! # MEW Protocol
//!
//! A multi-participant coordination fabric: humans, autonomous agents, and
//! tool servers share a message bus called a *space*. Every participant
//! connects to one gateway, exchanges uniformly framed envelopes, and acts
//! under per-participant capabilities the gateway enforces. Untrusted
//! agents stay safe because the gateway forces them to emit *proposals*
//! that privileged participants fulfill on their behalf.
//!
//! ## Architecture
//!
//! One single-writer router task per space owns every piece of mutable
//! state — participant registry, stream table, proposal tracker, history
//! log, timer wheel — and consumes a serialized event queue. Transport
//! tasks (pipe or WebSocket, one pair per participant) only parse bytes and
//! move frames. Multi-core throughput comes from running one router per
//! space, not from parallelizing within one.
//!
//! ## Quick start
//!
//! ```no_run
//! use mew_protocol::prelude::*;
//! use std::path::Path;
//!
//! # async fn example() -> mew_protocol::error::Result<()> {
//! let config = SpaceConfig::from_file(Path::new("space.yaml"))?;
//! let listener = config.listener.clone();
//! let (handle, router) = Router::spawn(config)?;
//!
//! if let Some(listener) = listener {
//!     let mut server = WebSocketServer::new(listener, handle.clone());
//!     tokio::spawn(async move { server.start().await });
//! }
//! router.await.ok();
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod capability;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod history;
pub mod proposal;
pub mod registry;
pub mod router;
pub mod stream;
pub mod timer;
pub mod transport;
pub mod welcome;

// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::capability::{Capability, GrantSet, GrantState};
    pub use crate::config::{
        LimitsConfig, ListenerConfig, ParticipantConfig, SpaceConfig, TransportKind,
    };
    pub use crate::envelope::{
        kinds, Envelope, EnvelopeBuilder, ErrorPayload, Normalizer, RawEnvelope, WelcomePayload,
    };
    pub use crate::error::{ErrorCode, GatewayError, Result};
    pub use crate::registry::{ParticipantRegistry, ParticipantState};
    pub use crate::router::{DisconnectReason, Router, SpaceHandle};
    pub use crate::stream::{StreamRecord, StreamTable};
    pub use crate::transport::pipe::{ClientFrame, PipeClient};
    pub use crate::transport::websocket::WebSocketServer;
    pub use crate::transport::JoinRequest;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
