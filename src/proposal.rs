// ABOUTME: Proposal tracker linking mcp/proposal to fulfilling request and response
// ABOUTME: Advisory only - observes correlation chains and accounts for timeouts

//! The proposal/correlation tracker (C6).
//!
//! An `mcp/proposal` is how an untrusted agent asks a privileged peer to
//! perform an MCP call on its behalf. The tracker indexes open proposals,
//! watches for an `mcp/request` that cites the proposal id with a
//! structurally equal payload, and marks the proposal fulfilled when an
//! `mcp/response` closes the chain. It is strictly advisory: it never
//! blocks delivery, and it never withdraws a proposal server-side —
//! expiry only produces a note to the proposer.
//!
//! Payload equality is checked through a SHA-256 digest of the canonical
//! JSON serialization, so the tracker holds a fixed 32 bytes per proposal
//! instead of the payload itself.

use crate::envelope::Envelope;
use crate::timer::TimerId;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Observable lifecycle of a tracked proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
    /// Indexed, no matching request seen yet
    Open,
    /// A capability-checked request cited this proposal with an equal payload
    AwaitingResponse,
    /// The correlation chain closed with a response
    Fulfilled,
    /// A privileged peer rejected the proposal
    Rejected,
}

/// One tracked proposal.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub proposal_id: String,
    pub proposer: String,
    pub payload_digest: [u8; 32],
    pub opened_at: DateTime<Utc>,
    pub state: ProposalState,
    /// Set when the lifetime elapsed before fulfillment
    pub expired_at: Option<DateTime<Utc>>,
    pub timer: Option<TimerId>,
}

/// Outcome of a timer expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotice {
    pub proposal_id: String,
    pub proposer: String,
    pub opened_at: DateTime<Utc>,
}

fn digest(payload: &Value) -> [u8; 32] {
    // serde_json's default map is ordered by key, so serialization is
    // canonical for structurally equal payloads.
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    Sha256::digest(&bytes).into()
}

/// The tracker (C6).
#[derive(Debug, Default)]
pub struct ProposalTracker {
    proposals: HashMap<String, Proposal>,
    /// fulfilling request id → proposal id
    requests: HashMap<String, String>,
}

impl ProposalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an accepted `mcp/proposal`.
    pub fn open(&mut self, envelope: &Envelope) {
        self.proposals.insert(
            envelope.id.clone(),
            Proposal {
                proposal_id: envelope.id.clone(),
                proposer: envelope.from.clone(),
                payload_digest: digest(&envelope.payload),
                opened_at: envelope.ts,
                state: ProposalState::Open,
                expired_at: None,
                timer: None,
            },
        );
    }

    /// Attach the expiry timer armed by the router.
    pub fn set_timer(&mut self, proposal_id: &str, timer: TimerId) {
        if let Some(proposal) = self.proposals.get_mut(proposal_id) {
            proposal.timer = Some(timer);
        }
    }

    pub fn get(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.get(proposal_id)
    }

    /// Observe an accepted `mcp/request`. When it cites an open proposal
    /// with a structurally equal payload, it becomes a fulfillment
    /// candidate and the proposal advances to `AwaitingResponse`.
    pub fn observe_request(&mut self, envelope: &Envelope) {
        let request_digest = digest(&envelope.payload);
        for cited in &envelope.correlation_id {
            if let Some(proposal) = self.proposals.get_mut(cited) {
                if proposal.payload_digest != request_digest {
                    continue;
                }
                if matches!(proposal.state, ProposalState::Open | ProposalState::AwaitingResponse) {
                    proposal.state = ProposalState::AwaitingResponse;
                    self.requests
                        .insert(envelope.id.clone(), cited.clone());
                }
            }
        }
    }

    /// Observe an accepted `mcp/response`. Returns the proposal that just
    /// became fulfilled (at most one transition per proposal, ever) along
    /// with its timer to disarm.
    pub fn observe_response(&mut self, envelope: &Envelope) -> Option<(String, Option<TimerId>)> {
        for cited in &envelope.correlation_id {
            let Some(proposal_id) = self.requests.get(cited) else {
                continue;
            };
            let proposal = self
                .proposals
                .get_mut(proposal_id)
                .expect("request index points at a live proposal");
            if proposal.state == ProposalState::Fulfilled {
                return None;
            }
            proposal.state = ProposalState::Fulfilled;
            let timer = proposal.timer.take();
            return Some((proposal.proposal_id.clone(), timer));
        }
        None
    }

    /// Observe an `mcp/withdraw` from the proposer. Returns the timer to
    /// disarm when a proposal was actually withdrawn.
    pub fn observe_withdraw(&mut self, envelope: &Envelope) -> Option<TimerId> {
        for cited in &envelope.correlation_id {
            let withdrawable = self
                .proposals
                .get(cited)
                .is_some_and(|p| p.proposer == envelope.from);
            if withdrawable {
                let proposal = self.proposals.remove(cited).expect("checked above");
                self.requests.retain(|_, pid| pid != cited);
                return proposal.timer;
            }
        }
        None
    }

    /// Observe an `mcp/reject`. The record is kept for observability; the
    /// expiry timer is disarmed since a timeout note would only be noise.
    pub fn observe_reject(&mut self, envelope: &Envelope) -> Option<TimerId> {
        for cited in &envelope.correlation_id {
            if let Some(proposal) = self.proposals.get_mut(cited) {
                if proposal.state == ProposalState::Fulfilled {
                    continue;
                }
                proposal.state = ProposalState::Rejected;
                return proposal.timer.take();
            }
        }
        None
    }

    /// Apply a lifetime expiry. Returns the notice to deliver to the
    /// proposer, or `None` when the proposal already reached a terminal
    /// observation. The proposal stays indexed — withdrawal is a
    /// participant concern.
    pub fn expire(&mut self, proposal_id: &str) -> Option<ExpiryNotice> {
        let proposal = self.proposals.get_mut(proposal_id)?;
        proposal.timer = None;
        if !matches!(
            proposal.state,
            ProposalState::Open | ProposalState::AwaitingResponse
        ) || proposal.expired_at.is_some()
        {
            return None;
        }
        proposal.expired_at = Some(Utc::now());
        Some(ExpiryNotice {
            proposal_id: proposal.proposal_id.clone(),
            proposer: proposal.proposer.clone(),
            opened_at: proposal.opened_at,
        })
    }

    pub fn open_count(&self) -> usize {
        self.proposals
            .values()
            .filter(|p| matches!(p.state, ProposalState::Open | ProposalState::AwaitingResponse))
            .count()
    }
}
