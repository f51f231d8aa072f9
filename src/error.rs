// ABOUTME: Error types and handling for the MEW gateway
// ABOUTME: Separates internal failures from the wire-level system/error taxonomy

//! Error types and utilities for the MEW gateway.
//!
//! Two layers live here: [`GatewayError`], the internal error type every
//! fallible gateway operation returns, and [`ErrorCode`], the closed set of
//! codes a `system/error` envelope may carry on the wire. Internal errors
//! that correspond to a protocol-visible rejection know their wire code;
//! everything else is local to the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Comprehensive error type for all gateway operations
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Envelope parsing or validation errors
    #[error("envelope error: {0}")]
    Envelope(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Network/transport errors
    #[error("transport error: {0}")]
    Transport(String),

    /// Authentication failures during the connection handshake
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Capability denials and other authorization failures
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Stream table errors
    #[error("stream error: {0}")]
    Stream(String),

    /// Participant lifecycle errors
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// Internal invariant violations
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a new envelope error
    pub fn envelope(msg: impl Into<String>) -> Self {
        Self::Envelope(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a new authorization error
    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a new lifecycle error
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

// Conversions from common error types
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Wire-level error codes carried by `system/error` envelopes.
///
/// The set is closed: participants can rely on matching these strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    MalformedEnvelope,
    UnknownKind,
    Paused,
    InvalidOperation,
    StreamNotFound,
    UnauthorizedStreamWrite,
    DuplicateEnvelope,
    BackpressureDisconnect,
}

impl ErrorCode {
    /// Wire representation of the code (matches the serde rendering).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::Forbidden => "Forbidden",
            ErrorCode::MalformedEnvelope => "MalformedEnvelope",
            ErrorCode::UnknownKind => "UnknownKind",
            ErrorCode::Paused => "Paused",
            ErrorCode::InvalidOperation => "InvalidOperation",
            ErrorCode::StreamNotFound => "StreamNotFound",
            ErrorCode::UnauthorizedStreamWrite => "UnauthorizedStreamWrite",
            ErrorCode::DuplicateEnvelope => "DuplicateEnvelope",
            ErrorCode::BackpressureDisconnect => "BackpressureDisconnect",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
