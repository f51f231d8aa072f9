// ABOUTME: Per-participant lifecycle state machine
// ABOUTME: Governs pause/resume/compact/clear/restart/shutdown transitions

//! The participant lifecycle state machine (C7).
//!
//! Each connected participant carries a [`Lifecycle`] the router consults
//! before capability matching. While paused, only the kinds in
//! [`crate::constants::PAUSED_ALLOWED_KINDS`] may leave the participant —
//! a hard invariant so orchestrators can always un-wedge a stuck agent.

use crate::constants::PAUSED_ALLOWED_KINDS;
use crate::timer::TimerId;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Participant lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    Connecting,
    Active,
    Paused,
    Compacting,
    Clearing,
    Restarting,
    ShutDown,
}

impl ParticipantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantState::Connecting => "connecting",
            ParticipantState::Active => "active",
            ParticipantState::Paused => "paused",
            ParticipantState::Compacting => "compacting",
            ParticipantState::Clearing => "clearing",
            ParticipantState::Restarting => "restarting",
            ParticipantState::ShutDown => "shut_down",
        }
    }
}

/// Active pause bookkeeping; deleted on resume or deadline expiry.
#[derive(Debug, Clone)]
pub struct PauseRecord {
    pub reason: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub timer: Option<TimerId>,
}

/// One participant's lifecycle.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ParticipantState,
    pause: Option<PauseRecord>,
    /// State to restore when a compact round-trip completes
    compact_return: Option<ParticipantState>,
    compact_timer: Option<TimerId>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: ParticipantState::Active,
            pause: None,
            compact_return: None,
            compact_timer: None,
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParticipantState {
        self.state
    }

    pub fn pause_record(&self) -> Option<&PauseRecord> {
        self.pause.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.state == ParticipantState::Paused
    }

    pub fn is_shut_down(&self) -> bool {
        self.state == ParticipantState::ShutDown
    }

    /// Whether an envelope of `kind` may leave this participant right now.
    ///
    /// The gate is kind-based. The allow-list admits `stream/close` for the
    /// participant's own streams only; that ownership half needs the stream
    /// table and is enforced by the router.
    pub fn may_emit(&self, kind: &str) -> bool {
        match self.state {
            ParticipantState::Paused => PAUSED_ALLOWED_KINDS.contains(&kind),
            ParticipantState::ShutDown => false,
            _ => true,
        }
    }

    /// active → paused. Returns the displaced timer (to disarm) when a
    /// pause was already in effect.
    pub fn pause(
        &mut self,
        reason: Option<String>,
        deadline: Option<DateTime<Utc>>,
        timer: Option<TimerId>,
    ) -> Option<TimerId> {
        let displaced = self.pause.take().and_then(|p| p.timer);
        self.state = ParticipantState::Paused;
        self.pause = Some(PauseRecord {
            reason,
            deadline,
            timer,
        });
        displaced
    }

    /// paused → active. Returns the pause timer to disarm, if armed.
    pub fn resume(&mut self) -> Option<TimerId> {
        if self.state != ParticipantState::Paused {
            return None;
        }
        self.state = ParticipantState::Active;
        self.pause.take().and_then(|p| p.timer)
    }

    /// any → compacting, remembering the state to restore.
    pub fn begin_compact(&mut self, timer: Option<TimerId>) {
        if self.state == ParticipantState::Compacting {
            return;
        }
        self.compact_return = Some(self.state);
        self.compact_timer = timer;
        self.state = ParticipantState::Compacting;
    }

    /// compacting → prior state. Returns the compact timer to disarm.
    pub fn finish_compact(&mut self) -> Option<TimerId> {
        if self.state != ParticipantState::Compacting {
            return None;
        }
        self.state = self.compact_return.take().unwrap_or(ParticipantState::Active);
        self.compact_timer.take()
    }

    /// Transient transition used by clear and restart: the caller broadcasts
    /// the intermediate state, then restores `active`.
    pub fn transient(&mut self, state: ParticipantState) -> ParticipantState {
        let prior = self.state;
        self.state = state;
        prior
    }

    pub fn restore_active(&mut self) {
        self.state = ParticipantState::Active;
        self.pause = None;
    }

    /// Terminal transition.
    pub fn shut_down(&mut self) -> Vec<TimerId> {
        self.state = ParticipantState::ShutDown;
        let mut timers = Vec::new();
        if let Some(timer) = self.pause.take().and_then(|p| p.timer) {
            timers.push(timer);
        }
        if let Some(timer) = self.compact_timer.take() {
            timers.push(timer);
        }
        self.compact_return = None;
        timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_active() {
        let lc = Lifecycle::new();
        assert_eq!(lc.state(), ParticipantState::Active);
        assert!(lc.may_emit("chat"));
        assert!(lc.may_emit("mcp/request"));
    }

    #[test]
    fn test_paused_participant_is_contained_to_allow_list() {
        let mut lc = Lifecycle::new();
        lc.pause(Some("stuck".to_string()), None, None);

        assert!(lc.is_paused());
        assert!(!lc.may_emit("chat"));
        assert!(!lc.may_emit("mcp/request"));
        assert!(lc.may_emit("chat/acknowledge"));
        assert!(lc.may_emit("chat/cancel"));
        assert!(lc.may_emit("participant/status"));
        assert!(lc.may_emit("participant/compact-done"));
        assert!(lc.may_emit("stream/close"));
        assert!(lc.may_emit("system/error"));
    }

    #[test]
    fn test_resume_clears_pause_record() {
        let mut lc = Lifecycle::new();
        lc.pause(None, None, None);
        assert!(lc.resume().is_none());
        assert_eq!(lc.state(), ParticipantState::Active);
        assert!(lc.pause_record().is_none());
        // Resuming an active participant is a no-op.
        assert!(lc.resume().is_none());
    }

    #[test]
    fn test_compact_restores_prior_state() {
        let mut lc = Lifecycle::new();
        lc.pause(None, None, None);
        lc.begin_compact(None);
        assert_eq!(lc.state(), ParticipantState::Compacting);

        lc.finish_compact();
        assert_eq!(lc.state(), ParticipantState::Paused);
    }

    #[test]
    fn test_compact_from_active_returns_to_active() {
        let mut lc = Lifecycle::new();
        lc.begin_compact(None);
        lc.finish_compact();
        assert_eq!(lc.state(), ParticipantState::Active);
    }

    #[test]
    fn test_shut_down_is_terminal_and_silent() {
        let mut lc = Lifecycle::new();
        lc.shut_down();
        assert!(lc.is_shut_down());
        assert!(!lc.may_emit("chat"));
        assert!(!lc.may_emit("participant/status"));
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(ParticipantState::ShutDown.as_str(), "shut_down");
        assert_eq!(
            serde_json::to_value(ParticipantState::Compacting).unwrap(),
            serde_json::json!("compacting")
        );
    }
}
