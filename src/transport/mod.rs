// ABOUTME: Transport façade presenting pipe and WebSocket connections uniformly
// ABOUTME: Handles the token handshake and frames envelopes and stream data

//! The transport façade (C9).
//!
//! Two concrete transports carry the same logical contract: an asynchronous
//! source of inbound frames and a sink for outbound ones, plus the opaque
//! binary side channel for stream data.
//!
//! * [`pipe`] — a half-duplex read stream and write stream per participant
//!   with length-prefixed frames, suitable for locally spawned subprocesses
//!   (and for in-memory duplex pairs in tests).
//! * [`websocket`] — a full-duplex text/binary connection for remote
//!   participants.
//!
//! Handshake: the client's first frame is a [`JoinRequest`] carrying its
//! bearer token (and optionally the participant id it claims). The router
//! verifies the token and either admits the participant — whose first
//! received envelope is then always `system/welcome` — or the transport
//! replies with a terminal `system/error` and closes.

pub mod frame;
pub mod pipe;
pub mod websocket;

pub use frame::OutboundFrame;

use crate::envelope::{kinds, Envelope, ErrorPayload};
use crate::error::ErrorCode;

use serde::{Deserialize, Serialize};

/// First frame of every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Opaque bearer token from the space configuration
    pub token: String,

    /// Participant id the client claims; narrows the token lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// Terminal error envelope written before closing an unauthenticated
/// connection.
pub(crate) fn handshake_rejection(message: &str) -> Envelope {
    Envelope::system(
        kinds::SYSTEM_ERROR,
        Vec::new(),
        serde_json::to_value(ErrorPayload::new(ErrorCode::Unauthorized, message))
            .expect("error payload serializes"),
    )
}
