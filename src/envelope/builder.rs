// ABOUTME: Envelope container and builder structures
// ABOUTME: Provides fluent API for building envelopes with routing metadata and payload

//! Envelope container and builder structures.

use crate::constants::protocol::PROTOCOL_VERSION;
use crate::error::{GatewayError, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The universal message unit exchanged in a space.
///
/// An `Envelope` wraps every participant-visible message with consistent
/// routing metadata: who sent it, who it is for, what kind of payload it
/// carries, and which earlier envelopes it responds to. An empty `to` set
/// means broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol tag, always [`PROTOCOL_VERSION`]
    pub protocol: String,

    /// Unique envelope id within the space (server-assigned when absent)
    pub id: String,

    /// Reception or creation timestamp, ISO-8601
    pub ts: DateTime<Utc>,

    /// Authenticated id of the sending participant
    pub from: String,

    /// Ordered recipient set; empty means broadcast
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,

    /// Dotted kind taxonomy, e.g. `mcp/request`, `chat`, `stream/open`
    pub kind: String,

    /// Envelope ids this envelope responds to or fulfills. Always a
    /// sequence on the inside; a scalar on the wire is coerced on ingress.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_correlation"
    )]
    pub correlation_id: Vec<String>,

    /// Opaque routing hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Kind-specific structured body
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Start building an envelope.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new()
    }

    /// Build a gateway-originated envelope addressed to `to` (empty = broadcast).
    pub fn system(kind: impl Into<String>, to: Vec<String>, payload: Value) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            id: Uuid::now_v7().to_string(),
            ts: Utc::now(),
            from: crate::constants::protocol::SYSTEM_PARTICIPANT.to_string(),
            to,
            kind: kind.into(),
            correlation_id: Vec::new(),
            context: None,
            payload,
        }
    }

    /// True when the envelope is addressed to every participant.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// True when this envelope cites `id` among its correlation targets.
    pub fn correlates_to(&self, id: &str) -> bool {
        self.correlation_id.iter().any(|c| c == id)
    }
}

/// Accept either a scalar correlation id or a sequence of them.
///
/// Historical senders emit a single string; the internal model is always a
/// sequence. Shared with [`RawEnvelope`](super::normalizer::RawEnvelope).
pub(crate) fn deserialize_correlation<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(id)) => vec![id],
        Some(OneOrMany::Many(ids)) => ids,
    })
}

/// Builder for creating envelopes with a fluent API
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    from: Option<String>,
    to: Vec<String>,
    kind: Option<String>,
    correlation_id: Vec<String>,
    context: Option<String>,
    payload: Value,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn to(mut self, to: Vec<String>) -> Self {
        self.to = to;
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn correlation(mut self, ids: Vec<String>) -> Self {
        self.correlation_id = ids;
        self
    }

    pub fn correlates_to(mut self, id: impl Into<String>) -> Self {
        self.correlation_id.push(id.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Build the envelope, stamping protocol, id, and timestamp.
    pub fn build(self) -> Result<Envelope> {
        let from = self
            .from
            .ok_or_else(|| GatewayError::envelope("from is required"))?;
        let kind = self
            .kind
            .ok_or_else(|| GatewayError::envelope("kind is required"))?;
        if kind.is_empty() {
            return Err(GatewayError::envelope("kind cannot be empty"));
        }

        Ok(Envelope {
            protocol: PROTOCOL_VERSION.to_string(),
            id: Uuid::now_v7().to_string(),
            ts: Utc::now(),
            from,
            to: self.to,
            kind,
            correlation_id: self.correlation_id,
            context: self.context,
            payload: self.payload,
        })
    }
}
