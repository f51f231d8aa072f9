// ABOUTME: Normative envelope kind taxonomy and namespace predicates
// ABOUTME: Defines which kinds exist and which are reserved to the gateway

//! The normative envelope kind taxonomy.
//!
//! Kind names are final and case-sensitive. Unknown kinds are not rejected
//! outright; they pass through when a participant's capability set permits
//! them, which is how spaces extend the protocol privately.

/// System kinds (gateway-originated)
pub const SYSTEM_WELCOME: &str = "system/welcome";
pub const SYSTEM_PRESENCE: &str = "system/presence";
pub const SYSTEM_ERROR: &str = "system/error";
pub const SYSTEM_HEARTBEAT: &str = "system/heartbeat";
pub const SYSTEM_PROPOSAL_TIMEOUT: &str = "system/proposal-timeout";

/// MCP application traffic
pub const MCP_REQUEST: &str = "mcp/request";
pub const MCP_RESPONSE: &str = "mcp/response";
pub const MCP_PROPOSAL: &str = "mcp/proposal";
pub const MCP_WITHDRAW: &str = "mcp/withdraw";
pub const MCP_REJECT: &str = "mcp/reject";
pub const MCP_NOTIFICATION: &str = "mcp/notification";

/// Capability and space management
pub const CAPABILITY_GRANT: &str = "capability/grant";
pub const CAPABILITY_REVOKE: &str = "capability/revoke";
pub const CAPABILITY_GRANT_ACK: &str = "capability/grant-ack";
pub const SPACE_INVITE: &str = "space/invite";
pub const SPACE_INVITE_ACK: &str = "space/invite-ack";
pub const SPACE_KICK: &str = "space/kick";

/// Chat
pub const CHAT: &str = "chat";
pub const CHAT_ACKNOWLEDGE: &str = "chat/acknowledge";
pub const CHAT_CANCEL: &str = "chat/cancel";

/// Reasoning transparency
pub const REASONING_START: &str = "reasoning/start";
pub const REASONING_THOUGHT: &str = "reasoning/thought";
pub const REASONING_CONCLUSION: &str = "reasoning/conclusion";
pub const REASONING_CANCEL: &str = "reasoning/cancel";

/// Participant control
pub const PARTICIPANT_PAUSE: &str = "participant/pause";
pub const PARTICIPANT_RESUME: &str = "participant/resume";
pub const PARTICIPANT_STATUS: &str = "participant/status";
pub const PARTICIPANT_REQUEST_STATUS: &str = "participant/request-status";
pub const PARTICIPANT_FORGET: &str = "participant/forget";
pub const PARTICIPANT_COMPACT: &str = "participant/compact";
pub const PARTICIPANT_COMPACT_DONE: &str = "participant/compact-done";
pub const PARTICIPANT_CLEAR: &str = "participant/clear";
pub const PARTICIPANT_RESTART: &str = "participant/restart";
pub const PARTICIPANT_SHUTDOWN: &str = "participant/shutdown";

/// Streams
pub const STREAM_REQUEST: &str = "stream/request";
pub const STREAM_OPEN: &str = "stream/open";
pub const STREAM_CLOSE: &str = "stream/close";
pub const STREAM_GRANT_WRITE: &str = "stream/grant-write";
pub const STREAM_REVOKE_WRITE: &str = "stream/revoke-write";
pub const STREAM_TRANSFER_OWNERSHIP: &str = "stream/transfer-ownership";
pub const STREAM_WRITE_GRANTED: &str = "stream/write-granted";
pub const STREAM_WRITE_REVOKED: &str = "stream/write-revoked";
pub const STREAM_OWNERSHIP_TRANSFERRED: &str = "stream/ownership-transferred";

/// Every kind in the normative taxonomy.
pub const KNOWN_KINDS: &[&str] = &[
    SYSTEM_WELCOME,
    SYSTEM_PRESENCE,
    SYSTEM_ERROR,
    SYSTEM_HEARTBEAT,
    SYSTEM_PROPOSAL_TIMEOUT,
    MCP_REQUEST,
    MCP_RESPONSE,
    MCP_PROPOSAL,
    MCP_WITHDRAW,
    MCP_REJECT,
    MCP_NOTIFICATION,
    CAPABILITY_GRANT,
    CAPABILITY_REVOKE,
    CAPABILITY_GRANT_ACK,
    SPACE_INVITE,
    SPACE_INVITE_ACK,
    SPACE_KICK,
    CHAT,
    CHAT_ACKNOWLEDGE,
    CHAT_CANCEL,
    REASONING_START,
    REASONING_THOUGHT,
    REASONING_CONCLUSION,
    REASONING_CANCEL,
    PARTICIPANT_PAUSE,
    PARTICIPANT_RESUME,
    PARTICIPANT_STATUS,
    PARTICIPANT_REQUEST_STATUS,
    PARTICIPANT_FORGET,
    PARTICIPANT_COMPACT,
    PARTICIPANT_COMPACT_DONE,
    PARTICIPANT_CLEAR,
    PARTICIPANT_RESTART,
    PARTICIPANT_SHUTDOWN,
    STREAM_REQUEST,
    STREAM_OPEN,
    STREAM_CLOSE,
    STREAM_GRANT_WRITE,
    STREAM_REVOKE_WRITE,
    STREAM_TRANSFER_OWNERSHIP,
    STREAM_WRITE_GRANTED,
    STREAM_WRITE_REVOKED,
    STREAM_OWNERSHIP_TRANSFERRED,
];

/// True when `kind` belongs to the normative taxonomy.
pub fn is_known(kind: &str) -> bool {
    KNOWN_KINDS.contains(&kind)
}

/// True when `kind` lives in the `system/` namespace.
pub fn is_system(kind: &str) -> bool {
    kind == "system" || kind.starts_with("system/")
}

/// True when `kind` may only originate from the gateway.
///
/// The whole `system/` namespace is reserved, with one carve-out:
/// `system/error` stays participant-sendable because the paused allow-list
/// names it (error reflections from wedged agents must always get through).
pub fn is_reserved_for_gateway(kind: &str) -> bool {
    is_system(kind) && kind != SYSTEM_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_membership() {
        assert!(is_known("chat"));
        assert!(is_known("mcp/proposal"));
        assert!(is_known("stream/ownership-transferred"));
        assert!(!is_known("chat/unknown"));
        assert!(!is_known("Chat"));
    }

    #[test]
    fn test_system_namespace_reservation() {
        assert!(is_reserved_for_gateway("system/welcome"));
        assert!(is_reserved_for_gateway("system/presence"));
        assert!(is_reserved_for_gateway("system/anything-new"));
        assert!(!is_reserved_for_gateway("system/error"));
        assert!(!is_reserved_for_gateway("mcp/request"));
    }
}
