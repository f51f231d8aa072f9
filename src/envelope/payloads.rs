// ABOUTME: Typed payload shapes for the normative envelope kinds
// ABOUTME: Preserves unknown payload fields wherever the gateway reflects them

//! Typed payload shapes.
//!
//! Payloads stay `serde_json::Value` inside the router; these structs are the
//! checked views the gateway deserializes when a kind has side effects.
//! Shapes that the gateway later reflects back (notably the stream request)
//! keep their unknown fields via `#[serde(flatten)]`.

use crate::capability::Capability;
use crate::error::ErrorCode;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A participant as other participants see it. Tokens never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: String,
    pub capabilities: Vec<Capability>,
    /// Last reported `participant/status` payload, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

/// `system/welcome` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub you: ParticipantView,
    pub participants: Vec<ParticipantView>,
    pub active_streams: Vec<Value>,
}

/// `system/presence` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub event: PresenceEvent,
    pub participant: ParticipantView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceEvent {
    Join,
    Leave,
}

/// `system/error` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub your_capabilities: Option<Vec<Capability>>,
}

impl ErrorPayload {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            attempted_kind: None,
            your_capabilities: None,
        }
    }

    pub fn with_attempted_kind(mut self, kind: impl Into<String>) -> Self {
        self.attempted_kind = Some(kind.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.your_capabilities = Some(capabilities);
        self
    }
}

/// `chat` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// `participant/pause` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PausePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// `participant/status` payload. Counters are maintained by the participant
/// itself; the gateway caches the latest report verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `participant/compact-done` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactDonePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freed_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freed_messages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Direction of a stream, from the requester's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    Upload,
    Download,
}

/// `stream/request` payload.
///
/// Every field beyond `direction` is preserved verbatim in the stream table
/// and spread back into welcome `active_streams` records; this is how late
/// joiners learn content types and application-specific parse hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequestPayload {
    pub direction: StreamDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `stream/open` payload announcing a newly created stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOpenPayload {
    pub stream_id: String,
    pub owner: String,
    pub direction: StreamDirection,
}

/// `stream/grant-write` and `stream/revoke-write` payloads (and the
/// `stream/write-granted` / `stream/write-revoked` acknowledgements).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamWritePayload {
    pub stream_id: String,
    pub participant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `stream/transfer-ownership` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamTransferPayload {
    pub stream_id: String,
    pub new_owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `stream/close` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamClosePayload {
    pub stream_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `capability/grant` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantPayload {
    pub recipient: String,
    pub capabilities: Vec<Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `capability/grant-ack` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantAckPayload {
    pub grant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// `capability/revoke` payload. Either a grant id or a structural pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokePayload {
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `space/kick` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickPayload {
    pub participant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `system/proposal-timeout` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalTimeoutPayload {
    pub proposal_id: String,
    pub opened_at: DateTime<Utc>,
}
