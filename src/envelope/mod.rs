// ABOUTME: Core envelope structures and normalization for the MEW gateway
// ABOUTME: Implements the universal message unit every participant exchanges

//! Core envelope structures and normalization.
//!
//! Every message that crosses the gateway is an [`Envelope`]: a uniformly
//! framed JSON document carrying routing metadata and a kind-specific
//! payload. The [`normalizer`] is the boundary between untrusted wire input
//! and the internal model; downstream components may assume structural
//! well-formedness.

pub mod builder;
pub mod kinds;
pub mod normalizer;
pub mod payloads;

pub use builder::{Envelope, EnvelopeBuilder};
pub use normalizer::{NormalizeError, Normalizer, RawEnvelope};

// Re-exports for convenience
pub use payloads::{
    ChatPayload, CompactDonePayload, ErrorPayload, GrantAckPayload, GrantPayload, KickPayload,
    ParticipantView, PausePayload, PresenceEvent, PresencePayload, ProposalTimeoutPayload,
    RevokePayload, StatusPayload, StreamClosePayload, StreamDirection, StreamOpenPayload,
    StreamRequestPayload, StreamTransferPayload, StreamWritePayload, WelcomePayload,
};
