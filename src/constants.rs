// ABOUTME: Protocol constants and default values for the MEW gateway
// ABOUTME: Centralizes timeouts, queue bounds, and reserved identifiers

//! Constants and default values for the MEW gateway.
//!
//! This module centralizes all hard-coded values so that every limit the
//! router enforces has exactly one definition.

use std::time::Duration;

/// Protocol identity
pub mod protocol {
    /// Protocol tag stamped on (and required of) every envelope.
    pub const PROTOCOL_VERSION: &str = "mew/v0.4";

    /// Reserved participant id for gateway-originated envelopes.
    pub const SYSTEM_PARTICIPANT: &str = "system";

    /// Recipient token that stands in for an empty `to` set during
    /// capability matching.
    pub const BROADCAST_TOKEN: &str = "*broadcast*";
}

/// Default timeout values
pub mod timeouts {
    use super::*;

    /// Default lifetime of an open proposal before the tracker notifies
    /// the proposer.
    pub const DEFAULT_PROPOSAL_LIFETIME: Duration = Duration::from_secs(300);

    /// Default pause duration applied when `participant/pause` carries no
    /// `timeout_seconds`.
    pub const DEFAULT_PAUSE_TIMEOUT: Duration = Duration::from_secs(1800);

    /// How long the lifecycle controller waits for `participant/compact-done`
    /// before restoring the participant's prior state.
    pub const DEFAULT_COMPACT_TIMEOUT: Duration = Duration::from_secs(120);

    /// How long a connection may sit in the handshake before it is dropped.
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Default sizing limits
pub mod limits {
    /// Default bound on a participant's outbound envelope queue. Exceeding
    /// it marks the participant for disconnect rather than blocking the
    /// space.
    pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

    /// Capacity of the router's single-writer event queue.
    pub const ROUTER_QUEUE_SIZE: usize = 1024;

    /// Default upper bound on a single binary stream frame.
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

    /// Upper bound on a single serialized envelope accepted off the wire.
    pub const MAX_ENVELOPE_BYTES: usize = 4 * 1024 * 1024;
}

/// Envelope kinds a paused participant may still emit.
///
/// This list is a hard invariant of the lifecycle controller: it is what
/// guarantees an orchestrator can always un-wedge a stuck agent.
pub const PAUSED_ALLOWED_KINDS: &[&str] = &[
    "chat/acknowledge",
    "chat/cancel",
    "participant/status",
    "participant/compact-done",
    "stream/close",
    "system/error",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_allow_list_is_closed() {
        assert!(PAUSED_ALLOWED_KINDS.contains(&"participant/status"));
        assert!(!PAUSED_ALLOWED_KINDS.contains(&"chat"));
        assert!(!PAUSED_ALLOWED_KINDS.contains(&"mcp/request"));
    }

    #[test]
    fn test_proposal_lifetime_default_is_five_minutes() {
        assert_eq!(timeouts::DEFAULT_PROPOSAL_LIFETIME, Duration::from_secs(300));
    }
}
