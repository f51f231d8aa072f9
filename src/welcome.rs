// ABOUTME: Builds the system/welcome snapshot sent first on every connection
// ABOUTME: Assembles the connecting participant, its peers, and active streams

//! The welcome builder (C8).
//!
//! On connect, after registry insertion and before anything else, the
//! gateway sends exactly one `system/welcome`: the connecting participant's
//! own record, every other connected participant's publicly visible record,
//! and the active streams with their request metadata preserved verbatim.
//! The welcome is the only snapshot — after it the participant is caught up
//! to "now" and receives live envelopes.

use crate::envelope::{kinds, Envelope, WelcomePayload};
use crate::error::{GatewayError, Result};
use crate::registry::ParticipantRegistry;
use crate::stream::StreamTable;

/// Assemble the `system/welcome` envelope for `participant_id`.
pub fn build_welcome(
    registry: &ParticipantRegistry,
    streams: &StreamTable,
    participant_id: &str,
) -> Result<Envelope> {
    let you = registry
        .get(participant_id)
        .ok_or_else(|| {
            GatewayError::internal(format!(
                "welcome requested for unregistered participant '{participant_id}'"
            ))
        })?
        .view();

    let payload = WelcomePayload {
        you,
        participants: registry.connected_views_except(participant_id),
        active_streams: streams.welcome_records(),
    };

    Ok(Envelope::system(
        kinds::SYSTEM_WELCOME,
        vec![participant_id.to_string()],
        serde_json::to_value(payload)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::config::ParticipantConfig;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn config(id: &str) -> ParticipantConfig {
        ParticipantConfig {
            id: id.to_string(),
            tokens: vec![format!("{id}-token")],
            capabilities: vec![Capability::kind_only("chat")],
            default_chat_to: None,
            command: None,
            args: Vec::new(),
            transport: None,
        }
    }

    #[test]
    fn test_welcome_contains_you_peers_and_streams() {
        let mut registry =
            ParticipantRegistry::new(&[config("alice"), config("bob"), config("carol")]).unwrap();
        registry.connect("alice", mpsc::channel(4).0).unwrap();
        registry.connect("bob", mpsc::channel(4).0).unwrap();

        let mut streams = StreamTable::new();
        streams.create(
            "alice",
            &serde_json::from_value(json!({"direction": "upload", "format": "jsonl"})).unwrap(),
        );

        let welcome = build_welcome(&registry, &streams, "bob").unwrap();
        assert_eq!(welcome.kind, "system/welcome");
        assert_eq!(welcome.from, "system");
        assert_eq!(welcome.to, vec!["bob".to_string()]);

        let payload = &welcome.payload;
        assert_eq!(payload["you"]["id"], json!("bob"));
        // Only connected peers appear; carol never connected.
        assert_eq!(payload["participants"].as_array().unwrap().len(), 1);
        assert_eq!(payload["participants"][0]["id"], json!("alice"));
        assert_eq!(payload["active_streams"][0]["format"], json!("jsonl"));
        // Tokens must never leak into a welcome.
        assert!(!welcome.payload.to_string().contains("token"));
    }
}
