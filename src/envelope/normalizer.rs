// ABOUTME: Envelope normalizer converting wire bytes into validated envelopes
// ABOUTME: Enforces protocol tag, sender identity, id uniqueness, and timestamps

//! The envelope normalizer.
//!
//! `normalize` is the boundary between untrusted input and the internal
//! model: it parses the wire document, rejects protocol violations, stamps
//! missing ids and timestamps, and coerces scalar correlation ids into
//! sequences. Everything downstream of the normalizer may assume structural
//! well-formedness.
//!
//! The normalizer is stateful: it remembers every envelope id it has
//! accepted for the life of the process so that a client replaying an id is
//! caught exactly once. It is owned by the router task, which keeps the
//! duplicate check inside the single-writer serialization.

use crate::constants::limits::MAX_ENVELOPE_BYTES;
use crate::constants::protocol::PROTOCOL_VERSION;
use crate::envelope::Envelope;
use crate::error::ErrorCode;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Wire form of an envelope before validation.
///
/// Every field a client may omit is optional here; [`Normalizer::normalize`]
/// fills the gaps or rejects.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    pub protocol: Option<String>,
    pub id: Option<String>,
    pub ts: Option<DateTime<Utc>>,
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    pub kind: Option<String>,
    #[serde(
        default,
        deserialize_with = "super::builder::deserialize_correlation"
    )]
    pub correlation_id: Vec<String>,
    pub context: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Why an inbound envelope was rejected at the normalization boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("from field '{claimed}' does not match authenticated sender '{actual}'")]
    SpoofedSender { claimed: String, actual: String },

    #[error("duplicate envelope id: {0}")]
    Duplicate(String),
}

impl NormalizeError {
    /// Wire code carried by the `system/error` reflection for this rejection.
    pub fn code(&self) -> ErrorCode {
        match self {
            NormalizeError::Malformed(_) => ErrorCode::MalformedEnvelope,
            NormalizeError::UnsupportedProtocol(_) => ErrorCode::MalformedEnvelope,
            NormalizeError::SpoofedSender { .. } => ErrorCode::MalformedEnvelope,
            NormalizeError::Duplicate(_) => ErrorCode::DuplicateEnvelope,
        }
    }
}

/// Stateful envelope normalizer (C1).
#[derive(Debug, Default)]
pub struct Normalizer {
    seen_ids: HashSet<String>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw wire bytes into a [`RawEnvelope`].
    pub fn parse(bytes: &[u8]) -> Result<RawEnvelope, NormalizeError> {
        if bytes.len() > MAX_ENVELOPE_BYTES {
            return Err(NormalizeError::Malformed(format!(
                "envelope exceeds {} bytes",
                MAX_ENVELOPE_BYTES
            )));
        }
        serde_json::from_slice(bytes).map_err(|e| NormalizeError::Malformed(e.to_string()))
    }

    /// Validate and stamp a raw envelope from the authenticated `sender_id`.
    ///
    /// On success the returned envelope's id is recorded; any later envelope
    /// reusing it is rejected as a duplicate.
    pub fn normalize(
        &mut self,
        raw: RawEnvelope,
        sender_id: &str,
    ) -> Result<Envelope, NormalizeError> {
        match raw.protocol.as_deref() {
            Some(PROTOCOL_VERSION) => {}
            Some(other) => {
                return Err(NormalizeError::UnsupportedProtocol(other.to_string()));
            }
            None => {
                return Err(NormalizeError::UnsupportedProtocol("<absent>".to_string()));
            }
        }

        let from = match raw.from {
            None => sender_id.to_string(),
            Some(claimed) if claimed == sender_id => claimed,
            Some(claimed) => {
                return Err(NormalizeError::SpoofedSender {
                    claimed,
                    actual: sender_id.to_string(),
                });
            }
        };

        let kind = raw
            .kind
            .filter(|k| !k.is_empty())
            .ok_or_else(|| NormalizeError::Malformed("kind is required".to_string()))?;

        let id = match raw.id {
            None => Uuid::now_v7().to_string(),
            Some(id) if id.is_empty() => {
                return Err(NormalizeError::Malformed("id cannot be empty".to_string()));
            }
            Some(id) => {
                if self.seen_ids.contains(&id) {
                    return Err(NormalizeError::Duplicate(id));
                }
                id
            }
        };

        self.seen_ids.insert(id.clone());

        Ok(Envelope {
            protocol: PROTOCOL_VERSION.to_string(),
            id,
            ts: raw.ts.unwrap_or_else(Utc::now),
            from,
            to: raw.to,
            kind,
            correlation_id: raw.correlation_id,
            context: raw.context,
            payload: raw.payload,
        })
    }

    /// Record a gateway-assigned id so clients cannot replay it later.
    pub fn reserve_id(&mut self, id: &str) {
        self.seen_ids.insert(id.to_string());
    }
}
