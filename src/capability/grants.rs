// ABOUTME: Runtime capability grant engine with pending-to-accepted promotion
// ABOUTME: Applies capability/grant, grant-ack, and revoke to a participant's set

//! The grant/revoke engine.
//!
//! Granted capabilities live beside a participant's static set. A grant the
//! grantor's own capabilities cover is accepted immediately; an elevated
//! grant stays *pending* until the grantee acknowledges it with
//! `capability/grant-ack`, and the matcher only ever sees accepted grants.
//! Revocation is strictly subtractive and takes effect immediately.

use super::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Acceptance state of a runtime grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantState {
    Pending,
    Accepted,
}

/// A single capability granted at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantedCapability {
    pub grant_id: String,
    pub grantor: String,
    pub capability: Capability,
    pub state: GrantState,
    pub granted_at: DateTime<Utc>,
}

/// The runtime grants held by one participant.
#[derive(Debug, Clone, Default)]
pub struct GrantSet {
    grants: Vec<GrantedCapability>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a grant id when the grantor did not supply one.
    pub fn allocate_grant_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Record capabilities granted under one grant id.
    pub fn add(
        &mut self,
        grant_id: &str,
        grantor: &str,
        capabilities: Vec<Capability>,
        state: GrantState,
    ) {
        let granted_at = Utc::now();
        for capability in capabilities {
            self.grants.push(GrantedCapability {
                grant_id: grant_id.to_string(),
                grantor: grantor.to_string(),
                capability,
                state,
                granted_at,
            });
        }
    }

    /// Promote every pending capability under `grant_id` to accepted.
    /// Returns how many were promoted.
    pub fn accept(&mut self, grant_id: &str) -> usize {
        let mut promoted = 0;
        for grant in &mut self.grants {
            if grant.grant_id == grant_id && grant.state == GrantState::Pending {
                grant.state = GrantState::Accepted;
                promoted += 1;
            }
        }
        promoted
    }

    /// Remove every capability under `grant_id`, pending or accepted.
    /// Returns how many were removed.
    pub fn revoke_by_id(&mut self, grant_id: &str) -> usize {
        let before = self.grants.len();
        self.grants.retain(|g| g.grant_id != grant_id);
        before - self.grants.len()
    }

    /// Remove every granted capability structurally equal (ignoring `id`)
    /// to one of `patterns`. Returns how many were removed.
    pub fn revoke_matching(&mut self, patterns: &[Capability]) -> usize {
        let before = self.grants.len();
        self.grants.retain(|g| {
            !patterns.iter().any(|p| {
                p.kind == g.capability.kind
                    && p.to == g.capability.to
                    && p.payload == g.capability.payload
            })
        });
        before - self.grants.len()
    }

    /// Drop everything (participant kicked or space reset).
    pub fn clear(&mut self) {
        self.grants.clear();
    }

    /// Accepted capabilities, as seen by the matcher.
    pub fn accepted(&self) -> impl Iterator<Item = &Capability> {
        self.grants
            .iter()
            .filter(|g| g.state == GrantState::Accepted)
            .map(|g| &g.capability)
    }

    /// All grants, for introspection.
    pub fn iter(&self) -> impl Iterator<Item = &GrantedCapability> {
        self.grants.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
