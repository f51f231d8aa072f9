// ABOUTME: Participant registry tracking identity, tokens, capabilities, presence
// ABOUTME: Authoritative source for welcome snapshots; mutated only by the router task

//! The participant registry (C3).
//!
//! Keyed by participant id with O(1) lookup. Records are seeded from the
//! space configuration and exist whether or not the participant is
//! connected; presence is the connected subset. Tokens are opaque bearer
//! secrets compared by digest so the comparison cost does not depend on
//! where the candidate diverges.

pub mod lifecycle;

pub use lifecycle::{Lifecycle, ParticipantState, PauseRecord};

use crate::capability::{Capability, GrantSet};
use crate::config::ParticipantConfig;
use crate::envelope::ParticipantView;
use crate::error::{GatewayError, Result};
use crate::transport::frame::OutboundFrame;

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// One participant's record.
#[derive(Debug)]
pub struct ParticipantRecord {
    pub id: String,
    tokens: Vec<String>,
    pub static_capabilities: Vec<Capability>,
    pub grants: GrantSet,
    pub lifecycle: Lifecycle,
    /// Last payload the participant reported via `participant/status`
    pub status: Option<Value>,
    /// Configured recipients for `chat` envelopes sent with an empty `to`
    pub default_chat_to: Option<Vec<String>>,
    outbound: Option<mpsc::Sender<OutboundFrame>>,
}

impl ParticipantRecord {
    fn from_config(config: &ParticipantConfig) -> Self {
        Self {
            id: config.id.clone(),
            tokens: config.tokens.clone(),
            static_capabilities: config.capabilities.clone(),
            grants: GrantSet::new(),
            lifecycle: Lifecycle::new(),
            status: None,
            default_chat_to: config.default_chat_to.clone(),
            outbound: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_some()
    }

    /// The sender for this participant's outbound queue, when connected.
    pub fn outbound(&self) -> Option<&mpsc::Sender<OutboundFrame>> {
        self.outbound.as_ref()
    }

    /// Effective capability set: static ∪ accepted grants.
    pub fn effective_capabilities(&self) -> Vec<Capability> {
        let mut all = self.static_capabilities.clone();
        all.extend(self.grants.accepted().cloned());
        all
    }

    /// Public view of this participant. Tokens never leak here.
    pub fn view(&self) -> ParticipantView {
        ParticipantView {
            id: self.id.clone(),
            capabilities: self.effective_capabilities(),
            status: self.status.clone(),
        }
    }

    fn holds_token(&self, candidate: &str) -> bool {
        self.tokens.iter().any(|t| token_eq(t, candidate))
    }
}

/// Compare two bearer tokens without a data-dependent early exit.
///
/// Both sides are hashed and the fixed-width digests compared, so the work
/// done is independent of where (or whether) the strings diverge.
fn token_eq(expected: &str, candidate: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let candidate = Sha256::digest(candidate.as_bytes());
    expected == candidate
}

/// The participant registry.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: HashMap<String, ParticipantRecord>,
}

impl ParticipantRegistry {
    /// Seed the registry from configuration.
    pub fn new(configs: &[ParticipantConfig]) -> Result<Self> {
        let mut participants = HashMap::new();
        for config in configs {
            if config.id == crate::constants::protocol::SYSTEM_PARTICIPANT {
                return Err(GatewayError::config(
                    "participant id 'system' is reserved for the gateway",
                ));
            }
            if participants
                .insert(config.id.clone(), ParticipantRecord::from_config(config))
                .is_some()
            {
                return Err(GatewayError::config(format!(
                    "duplicate participant id '{}'",
                    config.id
                )));
            }
        }
        Ok(Self { participants })
    }

    /// Resolve a bearer token to a participant id.
    ///
    /// With a `hint` only that participant's tokens are checked; without
    /// one, the whole registry is scanned.
    pub fn authenticate(&self, token: &str, hint: Option<&str>) -> Option<String> {
        match hint {
            Some(id) => self
                .participants
                .get(id)
                .filter(|p| p.holds_token(token))
                .map(|p| p.id.clone()),
            None => self
                .participants
                .values()
                .find(|p| p.holds_token(token))
                .map(|p| p.id.clone()),
        }
    }

    /// Mark a participant connected, installing its outbound queue.
    pub fn connect(
        &mut self,
        id: &str,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<()> {
        let record = self
            .participants
            .get_mut(id)
            .ok_or_else(|| GatewayError::authentication(format!("unknown participant '{id}'")))?;
        if record.outbound.is_some() {
            return Err(GatewayError::authentication(format!(
                "participant '{id}' is already connected"
            )));
        }
        record.outbound = Some(outbound);
        record.lifecycle = Lifecycle::new();
        Ok(())
    }

    /// Mark a participant disconnected. Grants survive reconnection;
    /// lifecycle state does not.
    pub fn disconnect(&mut self, id: &str) -> bool {
        match self.participants.get_mut(id) {
            Some(record) if record.outbound.is_some() => {
                record.outbound = None;
                record.status = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ParticipantRecord> {
        self.participants.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ParticipantRecord> {
        self.participants.get_mut(id)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.participants
            .get(id)
            .is_some_and(|p| p.is_connected())
    }

    /// Ids of every currently connected participant.
    pub fn connected_ids(&self) -> Vec<String> {
        self.participants
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Connected participants other than `except`.
    pub fn connected_views_except(&self, except: &str) -> Vec<ParticipantView> {
        self.participants
            .values()
            .filter(|p| p.is_connected() && p.id != except)
            .map(|p| p.view())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str, token: &str) -> ParticipantConfig {
        ParticipantConfig {
            id: id.to_string(),
            tokens: vec![token.to_string()],
            capabilities: vec![Capability::kind_only("chat")],
            default_chat_to: None,
            command: None,
            args: Vec::new(),
            transport: None,
        }
    }

    fn sender() -> mpsc::Sender<OutboundFrame> {
        mpsc::channel(4).0
    }

    #[test]
    fn test_token_authentication() {
        let registry =
            ParticipantRegistry::new(&[config("alice", "secret-a"), config("bob", "secret-b")])
                .unwrap();

        assert_eq!(registry.authenticate("secret-a", None), Some("alice".to_string()));
        assert_eq!(
            registry.authenticate("secret-b", Some("bob")),
            Some("bob".to_string())
        );
        assert_eq!(registry.authenticate("secret-b", Some("alice")), None);
        assert_eq!(registry.authenticate("wrong", None), None);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let err =
            ParticipantRegistry::new(&[config("alice", "t1"), config("alice", "t2")]).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_system_id_is_reserved() {
        let err = ParticipantRegistry::new(&[config("system", "t")]).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_connect_disconnect_presence() {
        let mut registry = ParticipantRegistry::new(&[config("alice", "t")]).unwrap();
        assert!(!registry.is_connected("alice"));

        registry.connect("alice", sender()).unwrap();
        assert!(registry.is_connected("alice"));
        assert_eq!(registry.connected_ids(), vec!["alice".to_string()]);

        // Double connect is refused.
        assert!(registry.connect("alice", sender()).is_err());

        assert!(registry.disconnect("alice"));
        assert!(!registry.disconnect("alice"));
        assert!(!registry.is_connected("alice"));
    }

    #[test]
    fn test_view_exposes_capabilities_not_tokens() {
        let registry = ParticipantRegistry::new(&[config("alice", "hunter2")]).unwrap();
        let view = registry.get("alice").unwrap().view();
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("chat"));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_effective_set_includes_accepted_grants_only() {
        let mut registry = ParticipantRegistry::new(&[config("alice", "t")]).unwrap();
        let record = registry.get_mut("alice").unwrap();
        record.grants.add(
            "g-1",
            "admin",
            vec![Capability::kind_only("mcp/request")],
            crate::capability::GrantState::Pending,
        );

        assert_eq!(record.effective_capabilities().len(), 1);
        record.grants.accept("g-1");
        assert_eq!(record.effective_capabilities().len(), 2);
    }
}
