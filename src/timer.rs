// ABOUTME: Min-heap timer wheel driving pause, proposal, and idle deadlines
// ABOUTME: Entries reference participants and proposals weakly, by id only

//! The timer wheel.
//!
//! A min-heap of deadlines owned by the router task. Entries are held
//! weakly: firing hands back a [`TimerClass`] naming a participant or
//! proposal by id, and the router looks the target up before acting, so a
//! timer can never dereference state that was torn down after it was armed.
//!
//! Cancellation removes the id from the live map; the heap entry stays
//! behind and is skipped when popped. Timers never mutate state directly —
//! the router consumes due entries on its own queue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tokio::time::Instant;

/// Opaque handle for one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a due timer means to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerClass {
    /// Auto-resume a paused participant
    PauseResume { participant_id: String },
    /// Restore a participant stuck in `compacting`
    CompactTimeout { participant_id: String },
    /// Notify a proposer that its proposal expired
    ProposalExpiry { proposal_id: String },
    /// Disconnect an idle participant
    IdleReap { participant_id: String },
    /// Broadcast a gateway heartbeat
    Heartbeat,
}

/// Min-heap timer facility (C12).
#[derive(Debug, Default)]
pub struct TimerWheel {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    live: HashMap<TimerId, TimerClass>,
    next_id: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer; returns its handle for cancellation.
    pub fn arm(&mut self, deadline: Instant, class: TimerClass) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, class);
        self.heap.push(Reverse((deadline, id)));
        id
    }

    /// Disarm a timer. Safe to call with an already-fired or unknown id.
    pub fn disarm(&mut self, id: TimerId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// The earliest deadline still live, if any.
    ///
    /// Stale heap entries for disarmed timers are drained here so the
    /// router never sleeps on a cancelled deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.live.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every entry due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(TimerId, TimerClass)> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(class) = self.live.remove(&id) {
                due.push((id, class));
            }
        }
        due
    }

    /// Number of live (armed, unfired) timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
