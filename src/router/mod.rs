// ABOUTME: Single-writer router task owning all mutable space state
// ABOUTME: Consumes a serialized event queue and fans envelopes to recipients

//! The router (C4) and the space event loop.
//!
//! One router task per space owns the registry, stream table, proposal
//! tracker, lifecycle bookkeeping, history log, and timer wheel. Every
//! mutation flows through its serialized event queue — inbound envelopes,
//! connects, disconnects, stream frames, timer firings — which makes the
//! ordering and authorization invariants checkable without locks. Transport
//! tasks only parse bytes and move frames; they never touch space state.
//!
//! Delivery: a broadcast goes to every connected participant except the
//! sender; a directed envelope goes to each listed recipient that is
//! currently connected. A recipient whose outbound queue is full is marked
//! for disconnect rather than allowed to block the space.

use crate::capability;
use crate::config::SpaceConfig;
use crate::constants::limits::ROUTER_QUEUE_SIZE;
use crate::envelope::{
    kinds, Envelope, ErrorPayload, GrantAckPayload, GrantPayload, KickPayload, NormalizeError,
    Normalizer, ParticipantView, PausePayload, PresenceEvent, PresencePayload,
    ProposalTimeoutPayload, RawEnvelope, RevokePayload, StreamOpenPayload, StreamRequestPayload,
    StreamTransferPayload, StreamWritePayload,
};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::history::HistoryLog;
use crate::proposal::ProposalTracker;
use crate::registry::{ParticipantRegistry, ParticipantState};
use crate::stream::StreamTable;
use crate::timer::{TimerClass, TimerWheel};
use crate::transport::frame::OutboundFrame;
use crate::welcome::build_welcome;

use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Why the router is disconnecting a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport closed or failed
    Transport,
    /// The outbound queue overflowed
    Backpressure,
    /// Kicked by a privileged participant
    Kicked { by: String, reason: Option<String> },
    /// Idle longer than the configured reaper allows
    Idle,
}

/// One entry on the router's serialized queue.
#[derive(Debug)]
pub enum SpaceEvent {
    /// A transport finished its handshake and wants admission.
    Connect {
        token: String,
        hint: Option<String>,
        outbound: mpsc::Sender<OutboundFrame>,
        reply: oneshot::Sender<Result<String>>,
    },
    /// A transport observed its connection end.
    Disconnect {
        participant_id: String,
        reason: DisconnectReason,
    },
    /// A parsed (not yet validated) envelope from a participant.
    Inbound {
        sender: String,
        raw: Box<RawEnvelope>,
    },
    /// The transport could not even parse the bytes.
    InboundInvalid {
        sender: String,
        error: NormalizeError,
    },
    /// An opaque binary frame tagged with a stream id.
    StreamFrame {
        sender: String,
        stream_id: String,
        data: Bytes,
    },
    /// Stop the space.
    Shutdown,
}

/// Cloneable handle the transports (and tests) use to talk to the router.
#[derive(Debug, Clone)]
pub struct SpaceHandle {
    events: mpsc::Sender<SpaceEvent>,
    outbound_queue_size: usize,
    max_frame_bytes: usize,
}

impl SpaceHandle {
    /// Admit a participant. On success, returns its id and the receiver
    /// the transport writer drains.
    pub async fn connect(
        &self,
        token: &str,
        hint: Option<&str>,
    ) -> Result<(String, mpsc::Receiver<OutboundFrame>)> {
        let (outbound, outbound_rx) = mpsc::channel(self.outbound_queue_size);
        let (reply, reply_rx) = oneshot::channel();
        self.events
            .send(SpaceEvent::Connect {
                token: token.to_string(),
                hint: hint.map(String::from),
                outbound,
                reply,
            })
            .await
            .map_err(|_| GatewayError::transport("space is shut down"))?;
        let participant_id = reply_rx
            .await
            .map_err(|_| GatewayError::transport("space dropped the connect request"))??;
        Ok((participant_id, outbound_rx))
    }

    pub async fn inbound(&self, sender: &str, raw: RawEnvelope) {
        let _ = self
            .events
            .send(SpaceEvent::Inbound {
                sender: sender.to_string(),
                raw: Box::new(raw),
            })
            .await;
    }

    pub async fn inbound_invalid(&self, sender: &str, error: NormalizeError) {
        let _ = self
            .events
            .send(SpaceEvent::InboundInvalid {
                sender: sender.to_string(),
                error,
            })
            .await;
    }

    pub async fn stream_frame(&self, sender: &str, stream_id: String, data: Bytes) {
        let _ = self
            .events
            .send(SpaceEvent::StreamFrame {
                sender: sender.to_string(),
                stream_id,
                data,
            })
            .await;
    }

    pub async fn disconnect(&self, participant_id: &str, reason: DisconnectReason) {
        let _ = self
            .events
            .send(SpaceEvent::Disconnect {
                participant_id: participant_id.to_string(),
                reason,
            })
            .await;
    }

    pub async fn shutdown(&self) {
        let _ = self.events.send(SpaceEvent::Shutdown).await;
    }

    /// Largest binary frame the space accepts.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

/// The router task state (C4 plus every subsystem it owns).
pub struct Router {
    config: SpaceConfig,
    registry: ParticipantRegistry,
    streams: StreamTable,
    proposals: ProposalTracker,
    history: HistoryLog,
    timers: TimerWheel,
    normalizer: Normalizer,
    idle_timers: HashMap<String, crate::timer::TimerId>,
    events: mpsc::Receiver<SpaceEvent>,
    marked_for_disconnect: Vec<(String, DisconnectReason)>,
    running: bool,
}

impl Router {
    /// Build a router and spawn its task. Returns the handle transports use.
    pub fn spawn(config: SpaceConfig) -> Result<(SpaceHandle, JoinHandle<()>)> {
        config.validate()?;
        let registry = ParticipantRegistry::new(&config.participants)?;
        let history = match &config.history_file {
            Some(path) => HistoryLog::with_file(path)?,
            None => HistoryLog::new(),
        };

        let (events_tx, events_rx) = mpsc::channel(ROUTER_QUEUE_SIZE);
        let handle = SpaceHandle {
            events: events_tx,
            outbound_queue_size: config.limits.outbound_queue_size,
            max_frame_bytes: config.limits.max_frame_bytes,
        };

        let mut router = Router {
            registry,
            streams: StreamTable::new(),
            proposals: ProposalTracker::new(),
            history,
            timers: TimerWheel::new(),
            normalizer: Normalizer::new(),
            idle_timers: HashMap::new(),
            events: events_rx,
            marked_for_disconnect: Vec::new(),
            running: true,
            config,
        };

        let join = tokio::spawn(async move {
            router.run().await;
        });
        Ok((handle, join))
    }

    async fn run(&mut self) {
        if let Some(interval) = self.config.limits.heartbeat_interval() {
            self.timers
                .arm(Instant::now() + interval, TimerClass::Heartbeat);
        }
        tracing::info!(
            space = self.config.name.as_deref().unwrap_or("<unnamed>"),
            participants = self.config.participants.len(),
            "space router started"
        );

        while self.running {
            let deadline = self.timers.next_deadline();
            let sleep = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = sleep => {
                    for (_, class) in self.timers.pop_due(Instant::now()) {
                        self.handle_timer(class);
                    }
                }
            }

            self.flush_disconnects();
        }

        tracing::info!("space router stopped");
    }

    fn handle_event(&mut self, event: SpaceEvent) {
        match event {
            SpaceEvent::Connect {
                token,
                hint,
                outbound,
                reply,
            } => {
                let _ = reply.send(self.handle_connect(&token, hint.as_deref(), outbound));
            }
            SpaceEvent::Disconnect {
                participant_id,
                reason,
            } => {
                self.remove_participant(&participant_id, &reason);
            }
            SpaceEvent::Inbound { sender, raw } => self.handle_inbound(&sender, *raw),
            SpaceEvent::InboundInvalid { sender, error } => {
                self.reflect_error(
                    &sender,
                    None,
                    ErrorPayload::new(error.code(), error.to_string()),
                );
            }
            SpaceEvent::StreamFrame {
                sender,
                stream_id,
                data,
            } => self.handle_stream_frame(&sender, &stream_id, data),
            SpaceEvent::Shutdown => {
                self.running = false;
            }
        }
    }

    // ── connection lifecycle ────────────────────────────────────────────

    fn handle_connect(
        &mut self,
        token: &str,
        hint: Option<&str>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<String> {
        let participant_id = self
            .registry
            .authenticate(token, hint)
            .ok_or_else(|| GatewayError::authentication("unknown token"))?;

        self.registry.connect(&participant_id, outbound)?;

        // Welcome precedes everything else on this connection; presence
        // join follows it, addressed to everyone else.
        let welcome = build_welcome(&self.registry, &self.streams, &participant_id)?;
        self.deliver_system(welcome);
        self.broadcast_presence(PresenceEvent::Join, &participant_id);

        if let Some(idle) = self.config.limits.idle_timeout() {
            let timer = self.timers.arm(
                Instant::now() + idle,
                TimerClass::IdleReap {
                    participant_id: participant_id.clone(),
                },
            );
            self.idle_timers.insert(participant_id.clone(), timer);
        }

        tracing::info!(participant = %participant_id, "participant joined");
        Ok(participant_id)
    }

    fn remove_participant(&mut self, participant_id: &str, reason: &DisconnectReason) {
        // Capture the public view before removal so the leave notice can
        // carry it.
        let view = match self.registry.get(participant_id) {
            Some(record) if record.is_connected() => record.view(),
            _ => return,
        };

        if let Some(record) = self.registry.get_mut(participant_id) {
            for timer in record.lifecycle.shut_down() {
                self.timers.disarm(timer);
            }
        }
        if let Some(timer) = self.idle_timers.remove(participant_id) {
            self.timers.disarm(timer);
        }

        let outcome = self.streams.on_disconnect(participant_id);
        self.registry.disconnect(participant_id);

        for closed in outcome.closed {
            self.deliver_system(Envelope::system(
                kinds::STREAM_CLOSE,
                Vec::new(),
                json!({"stream_id": closed.stream_id, "reason": "owner-disconnected"}),
            ));
        }

        self.broadcast_system(Envelope::system(
            kinds::SYSTEM_PRESENCE,
            Vec::new(),
            serde_json::to_value(PresencePayload {
                event: PresenceEvent::Leave,
                participant: view,
            })
            .expect("presence payload serializes"),
        ));

        tracing::info!(participant = %participant_id, ?reason, "participant left");
    }

    // ── inbound envelopes ───────────────────────────────────────────────

    fn handle_inbound(&mut self, sender: &str, raw: RawEnvelope) {
        if !self.registry.is_connected(sender) {
            // Raced with a disconnect already processed; idempotent drop.
            return;
        }
        self.touch_idle(sender);

        let correlate = raw.id.clone();
        let envelope = match self.normalizer.normalize(raw, sender) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::debug!(%sender, %error, "envelope rejected at normalization");
                self.reflect_error(
                    sender,
                    correlate,
                    ErrorPayload::new(error.code(), error.to_string()),
                );
                return;
            }
        };

        // The system namespace is reserved: emitting it is a protocol
        // error, not a capability issue.
        if kinds::is_reserved_for_gateway(&envelope.kind) {
            self.reflect_error(
                sender,
                Some(envelope.id),
                ErrorPayload::new(
                    ErrorCode::InvalidOperation,
                    format!("'{}' envelopes are gateway-originated", envelope.kind),
                )
                .with_attempted_kind(envelope.kind),
            );
            return;
        }

        // Lifecycle gate: a paused participant is contained to the
        // allow-list; a shut-down one emits nothing.
        let record = self.registry.get(sender).expect("sender checked connected");
        if !record.lifecycle.may_emit(&envelope.kind) {
            let (code, message) = if record.lifecycle.is_shut_down() {
                (
                    ErrorCode::InvalidOperation,
                    "participant is shut down".to_string(),
                )
            } else {
                (
                    ErrorCode::Paused,
                    "participant is paused; envelope not routed".to_string(),
                )
            };
            self.reflect_error(
                sender,
                Some(envelope.id.clone()),
                ErrorPayload::new(code, message).with_attempted_kind(envelope.kind),
            );
            return;
        }

        // Capability check.
        let effective = record.effective_capabilities();
        if capability::first_match(&effective, &envelope).is_none() {
            let code = if kinds::is_known(&envelope.kind) {
                ErrorCode::Forbidden
            } else {
                ErrorCode::UnknownKind
            };
            self.reflect_error(
                sender,
                Some(envelope.id.clone()),
                ErrorPayload::new(code, "no capability permits this envelope")
                    .with_attempted_kind(envelope.kind)
                    .with_capabilities(effective),
            );
            return;
        }

        self.apply_side_effects_and_route(envelope);
    }

    /// Side effects (C5/C6/C7/C11) run before routing; the envelope is then
    /// persisted and fanned out unless a side effect rejected it.
    fn apply_side_effects_and_route(&mut self, mut envelope: Envelope) {
        let kind = envelope.kind.clone();
        match kind.as_str() {
            kinds::CHAT => {
                if envelope.to.is_empty() {
                    if let Some(default_to) = self
                        .registry
                        .get(&envelope.from)
                        .and_then(|r| r.default_chat_to.clone())
                    {
                        envelope.to = default_to;
                    }
                }
            }

            kinds::MCP_PROPOSAL => {
                self.proposals.open(&envelope);
                let timer = self.timers.arm(
                    Instant::now() + self.config.limits.proposal_lifetime(),
                    TimerClass::ProposalExpiry {
                        proposal_id: envelope.id.clone(),
                    },
                );
                self.proposals.set_timer(&envelope.id, timer);
            }
            kinds::MCP_REQUEST => self.proposals.observe_request(&envelope),
            kinds::MCP_RESPONSE => {
                if let Some((proposal_id, timer)) = self.proposals.observe_response(&envelope) {
                    if let Some(timer) = timer {
                        self.timers.disarm(timer);
                    }
                    tracing::debug!(proposal = %proposal_id, "proposal fulfilled");
                }
            }
            kinds::MCP_WITHDRAW => {
                if let Some(timer) = self.proposals.observe_withdraw(&envelope) {
                    self.timers.disarm(timer);
                }
            }
            kinds::MCP_REJECT => {
                if let Some(timer) = self.proposals.observe_reject(&envelope) {
                    self.timers.disarm(timer);
                }
            }

            kinds::CAPABILITY_GRANT => {
                if !self.apply_grant(&mut envelope) {
                    return;
                }
            }
            kinds::CAPABILITY_GRANT_ACK => self.apply_grant_ack(&envelope),
            kinds::CAPABILITY_REVOKE => {
                if !self.apply_revoke(&envelope) {
                    return;
                }
            }
            kinds::SPACE_KICK => {
                if !self.apply_kick(&envelope) {
                    return;
                }
            }

            kinds::PARTICIPANT_PAUSE => {
                if !self.apply_pause(&envelope) {
                    return;
                }
            }
            kinds::PARTICIPANT_RESUME => self.apply_resume_targets(&envelope),
            kinds::PARTICIPANT_COMPACT => self.apply_compact(&envelope),
            kinds::PARTICIPANT_COMPACT_DONE => self.apply_compact_done(&envelope.from.clone()),
            kinds::PARTICIPANT_CLEAR => self.apply_transient(&envelope, ParticipantState::Clearing),
            kinds::PARTICIPANT_RESTART => self.apply_restart(&envelope),
            kinds::PARTICIPANT_SHUTDOWN => self.apply_shutdown(&envelope),
            kinds::PARTICIPANT_STATUS => {
                let from = envelope.from.clone();
                let payload = envelope.payload.clone();
                if let Some(record) = self.registry.get_mut(&from) {
                    record.status = Some(payload);
                }
            }

            kinds::STREAM_REQUEST => {
                if !self.apply_stream_request(&envelope) {
                    return;
                }
            }
            kinds::STREAM_GRANT_WRITE => {
                if !self.apply_stream_write_change(&envelope, true) {
                    return;
                }
            }
            kinds::STREAM_REVOKE_WRITE => {
                if !self.apply_stream_write_change(&envelope, false) {
                    return;
                }
            }
            kinds::STREAM_TRANSFER_OWNERSHIP => {
                if !self.apply_stream_transfer(&envelope) {
                    return;
                }
            }
            kinds::STREAM_CLOSE => {
                if !self.apply_stream_close(&envelope) {
                    return;
                }
            }

            // Everything else routes with no gateway side effects.
            _ => {}
        }

        self.route(envelope);
    }

    /// Persist to history, then deliver to every recipient (C4).
    fn route(&mut self, envelope: Envelope) {
        if let Err(error) = self.history.append(envelope.clone()) {
            // An unwritable journal is an invariant violation for this
            // space: stop rather than deliver envelopes that were never
            // made durable.
            tracing::error!(%error, "history append failed; stopping space");
            self.running = false;
            return;
        }

        let recipients: Vec<String> = if envelope.to.is_empty() {
            self.registry
                .connected_ids()
                .into_iter()
                .filter(|id| id != &envelope.from)
                .collect()
        } else {
            envelope
                .to
                .iter()
                .filter(|id| *id != &envelope.from && self.registry.is_connected(id))
                .cloned()
                .collect()
        };

        for recipient in recipients {
            self.send_frame(&recipient, OutboundFrame::Envelope(envelope.clone()));
        }
    }

    // ── binary stream frames ────────────────────────────────────────────

    fn handle_stream_frame(&mut self, sender: &str, stream_id: &str, data: Bytes) {
        if !self.registry.is_connected(sender) {
            return;
        }
        self.touch_idle(sender);

        if data.len() > self.config.limits.max_frame_bytes {
            self.reflect_error(
                sender,
                None,
                ErrorPayload::new(
                    ErrorCode::InvalidOperation,
                    format!(
                        "stream frame of {} bytes exceeds limit {}",
                        data.len(),
                        self.config.limits.max_frame_bytes
                    ),
                ),
            );
            return;
        }

        if let Err(error) = self.streams.authorize_frame(stream_id, sender) {
            self.reflect_error(
                sender,
                None,
                ErrorPayload::new(error.code(), error.to_string()),
            );
            return;
        }

        for recipient in self.registry.connected_ids() {
            if recipient == sender {
                continue;
            }
            self.send_frame(
                &recipient,
                OutboundFrame::Stream {
                    stream_id: stream_id.to_string(),
                    data: data.clone(),
                },
            );
        }
    }

    // ── capability side effects (C11) ───────────────────────────────────

    fn apply_grant(&mut self, envelope: &mut Envelope) -> bool {
        let mut payload: GrantPayload = match serde_json::from_value(envelope.payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                self.reflect_invalid_payload(envelope, &error.to_string());
                return false;
            }
        };
        if self.registry.get(&payload.recipient).is_none() {
            self.reflect_error(
                &envelope.from.clone(),
                Some(envelope.id.clone()),
                ErrorPayload::new(
                    ErrorCode::InvalidOperation,
                    format!("unknown grant recipient '{}'", payload.recipient),
                ),
            );
            return false;
        }

        let grant_id = payload
            .grant_id
            .clone()
            .unwrap_or_else(crate::capability::GrantSet::allocate_grant_id);

        // Covered grants are accepted immediately; elevated grants stay
        // pending until the grantee acknowledges them.
        let grantor_set = self
            .registry
            .get(&envelope.from)
            .map(|r| r.effective_capabilities())
            .unwrap_or_default();
        let covered = payload
            .capabilities
            .iter()
            .all(|c| capability::covers(&grantor_set, c));
        let state = if covered {
            crate::capability::GrantState::Accepted
        } else {
            crate::capability::GrantState::Pending
        };

        let grantor = envelope.from.clone();
        let recipient = payload.recipient.clone();
        let capabilities = payload.capabilities.clone();
        self.registry
            .get_mut(&recipient)
            .expect("recipient checked above")
            .grants
            .add(&grant_id, &grantor, capabilities, state);

        tracing::info!(
            %grantor,
            %recipient,
            %grant_id,
            accepted = covered,
            "capability grant recorded"
        );

        // Reflect the allocated grant id into the routed envelope so the
        // grantee can acknowledge it.
        payload.grant_id = Some(grant_id);
        envelope.payload = serde_json::to_value(payload).expect("grant payload serializes");
        true
    }

    fn apply_grant_ack(&mut self, envelope: &Envelope) {
        let Ok(payload) = serde_json::from_value::<GrantAckPayload>(envelope.payload.clone())
        else {
            return;
        };
        let from = envelope.from.clone();
        if let Some(record) = self.registry.get_mut(&from) {
            let promoted = record.grants.accept(&payload.grant_id);
            if promoted > 0 {
                tracing::info!(grantee = %from, grant_id = %payload.grant_id, promoted, "grant accepted");
            }
        }
    }

    fn apply_revoke(&mut self, envelope: &Envelope) -> bool {
        let payload: RevokePayload = match serde_json::from_value(envelope.payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                self.reflect_invalid_payload(envelope, &error.to_string());
                return false;
            }
        };
        let Some(record) = self.registry.get_mut(&payload.recipient) else {
            return true;
        };
        let removed = match (&payload.grant_id, &payload.capabilities) {
            (Some(grant_id), _) => record.grants.revoke_by_id(grant_id),
            (None, Some(patterns)) => record.grants.revoke_matching(patterns),
            (None, None) => 0,
        };
        tracing::info!(recipient = %payload.recipient, removed, "capabilities revoked");
        true
    }

    fn apply_kick(&mut self, envelope: &Envelope) -> bool {
        let payload: KickPayload = match serde_json::from_value(envelope.payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                self.reflect_invalid_payload(envelope, &error.to_string());
                return false;
            }
        };
        if self.registry.is_connected(&payload.participant_id) {
            self.reflect_error(
                &payload.participant_id,
                Some(envelope.id.clone()),
                ErrorPayload::new(
                    ErrorCode::Forbidden,
                    payload
                        .reason
                        .clone()
                        .unwrap_or_else(|| "kicked from space".to_string()),
                ),
            );
            self.marked_for_disconnect.push((
                payload.participant_id.clone(),
                DisconnectReason::Kicked {
                    by: envelope.from.clone(),
                    reason: payload.reason,
                },
            ));
        }
        true
    }

    // ── lifecycle side effects (C7) ─────────────────────────────────────

    fn apply_pause(&mut self, envelope: &Envelope) -> bool {
        if envelope.to.is_empty() {
            self.reflect_error(
                &envelope.from.clone(),
                Some(envelope.id.clone()),
                ErrorPayload::new(ErrorCode::InvalidOperation, "pause requires a target"),
            );
            return false;
        }
        let payload: PausePayload =
            serde_json::from_value(envelope.payload.clone()).unwrap_or_default();
        let timeout = payload
            .timeout_seconds
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| self.config.limits.pause_timeout());

        let mut any_paused = false;
        for target in envelope.to.clone() {
            if !self.registry.is_connected(&target) {
                continue;
            }
            // The state table only admits active → paused. Pausing a
            // compacting (or otherwise transitioning) participant would
            // clobber the state it has to return to and orphan its timers.
            let state = self
                .registry
                .get(&target)
                .expect("target checked connected")
                .lifecycle
                .state();
            if state != ParticipantState::Active {
                self.reflect_error(
                    &envelope.from.clone(),
                    Some(envelope.id.clone()),
                    ErrorPayload::new(
                        ErrorCode::InvalidOperation,
                        format!("cannot pause '{target}' while {}", state.as_str()),
                    )
                    .with_attempted_kind(envelope.kind.clone()),
                );
                continue;
            }
            let timer = self.timers.arm(
                Instant::now() + timeout,
                TimerClass::PauseResume {
                    participant_id: target.clone(),
                },
            );
            let deadline =
                Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
            let displaced = self
                .registry
                .get_mut(&target)
                .expect("target checked connected")
                .lifecycle
                .pause(payload.reason.clone(), Some(deadline), Some(timer));
            if let Some(displaced) = displaced {
                self.timers.disarm(displaced);
            }
            self.broadcast_status(&target, "paused", payload.reason.as_deref());
            any_paused = true;
        }
        // Forward the control envelope only when some target actually
        // transitioned; the sender already got an error for the rest.
        any_paused
    }

    fn apply_resume_targets(&mut self, envelope: &Envelope) {
        for target in envelope.to.clone() {
            self.resume_participant(&target);
        }
    }

    fn resume_participant(&mut self, target: &str) {
        let Some(record) = self.registry.get_mut(target) else {
            return;
        };
        if !record.lifecycle.is_paused() {
            return;
        }
        if let Some(timer) = record.lifecycle.resume() {
            self.timers.disarm(timer);
        }
        if self.registry.is_connected(target) {
            self.broadcast_status(target, "active", None);
        }
    }

    fn apply_compact(&mut self, envelope: &Envelope) {
        let timeout = crate::constants::timeouts::DEFAULT_COMPACT_TIMEOUT;
        for target in envelope.to.clone() {
            if !self.registry.is_connected(&target) {
                continue;
            }
            let timer = self.timers.arm(
                Instant::now() + timeout,
                TimerClass::CompactTimeout {
                    participant_id: target.clone(),
                },
            );
            self.registry
                .get_mut(&target)
                .expect("target checked connected")
                .lifecycle
                .begin_compact(Some(timer));
            self.broadcast_status(&target, "compacting", None);
        }
    }

    fn apply_compact_done(&mut self, participant_id: &str) {
        let Some(record) = self.registry.get_mut(participant_id) else {
            return;
        };
        if record.lifecycle.state() != ParticipantState::Compacting {
            return;
        }
        if let Some(timer) = record.lifecycle.finish_compact() {
            self.timers.disarm(timer);
        }
        let state = record.lifecycle.state().as_str();
        self.broadcast_status(participant_id, state, None);
    }

    /// Clear is transient: broadcast the intermediate state, forward the
    /// control envelope (the caller routes it), restore active.
    fn apply_transient(&mut self, envelope: &Envelope, state: ParticipantState) {
        for target in envelope.to.clone() {
            let Some(record) = self.registry.get_mut(&target) else {
                continue;
            };
            if !record.is_connected() {
                continue;
            }
            record.lifecycle.transient(state);
            self.broadcast_status(&target, state.as_str(), None);
            self.registry
                .get_mut(&target)
                .expect("target checked connected")
                .lifecycle
                .restore_active();
            self.broadcast_status(&target, "active", None);
        }
    }

    fn apply_restart(&mut self, envelope: &Envelope) {
        for target in envelope.to.clone() {
            if !self.registry.is_connected(&target) {
                continue;
            }
            // Streams only the restarting participant could write are dead
            // weight; close them on its behalf.
            for closed in self.streams.close_sole_writer_streams(&target) {
                self.deliver_system(Envelope::system(
                    kinds::STREAM_CLOSE,
                    Vec::new(),
                    json!({"stream_id": closed.stream_id, "reason": "participant-restarting"}),
                ));
            }
        }
        self.apply_transient(envelope, ParticipantState::Restarting);
    }

    fn apply_shutdown(&mut self, envelope: &Envelope) {
        for target in envelope.to.clone() {
            let Some(record) = self.registry.get_mut(&target) else {
                continue;
            };
            if !record.is_connected() {
                continue;
            }
            for timer in record.lifecycle.shut_down() {
                self.timers.disarm(timer);
            }
            self.broadcast_status(&target, "shut_down", None);
        }
    }

    // ── stream side effects (C5) ────────────────────────────────────────

    fn apply_stream_request(&mut self, envelope: &Envelope) -> bool {
        let payload: StreamRequestPayload = match serde_json::from_value(envelope.payload.clone())
        {
            Ok(payload) => payload,
            Err(error) => {
                self.reflect_invalid_payload(envelope, &error.to_string());
                return false;
            }
        };
        let record = self.streams.create(&envelope.from, &payload);
        let open = StreamOpenPayload {
            stream_id: record.stream_id.clone(),
            owner: record.owner.clone(),
            direction: record.direction,
        };
        let mut announce = Envelope::system(
            kinds::STREAM_OPEN,
            Vec::new(),
            serde_json::to_value(open).expect("stream open payload serializes"),
        );
        announce.correlation_id = vec![envelope.id.clone()];
        self.broadcast_system(announce);
        true
    }

    fn apply_stream_write_change(&mut self, envelope: &Envelope, grant: bool) -> bool {
        let payload: StreamWritePayload = match serde_json::from_value(envelope.payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                self.reflect_invalid_payload(envelope, &error.to_string());
                return false;
            }
        };
        let result = if grant {
            self.streams
                .grant_write(&payload.stream_id, &envelope.from, &payload.participant_id)
        } else {
            self.streams
                .revoke_write(&payload.stream_id, &envelope.from, &payload.participant_id)
        };
        if let Err(error) = result {
            self.reflect_error(
                &envelope.from.clone(),
                Some(envelope.id.clone()),
                ErrorPayload::new(error.code(), error.to_string())
                    .with_attempted_kind(envelope.kind.clone()),
            );
            return false;
        }

        let ack_kind = if grant {
            kinds::STREAM_WRITE_GRANTED
        } else {
            kinds::STREAM_WRITE_REVOKED
        };
        let mut ack = Envelope::system(
            ack_kind,
            Vec::new(),
            serde_json::to_value(&payload).expect("stream write payload serializes"),
        );
        ack.correlation_id = vec![envelope.id.clone()];
        self.broadcast_system(ack);
        true
    }

    fn apply_stream_transfer(&mut self, envelope: &Envelope) -> bool {
        let payload: StreamTransferPayload = match serde_json::from_value(envelope.payload.clone())
        {
            Ok(payload) => payload,
            Err(error) => {
                self.reflect_invalid_payload(envelope, &error.to_string());
                return false;
            }
        };
        if let Err(error) =
            self.streams
                .transfer_ownership(&payload.stream_id, &envelope.from, &payload.new_owner)
        {
            self.reflect_error(
                &envelope.from.clone(),
                Some(envelope.id.clone()),
                ErrorPayload::new(error.code(), error.to_string())
                    .with_attempted_kind(envelope.kind.clone()),
            );
            return false;
        }
        let mut ack = Envelope::system(
            kinds::STREAM_OWNERSHIP_TRANSFERRED,
            Vec::new(),
            serde_json::to_value(&payload).expect("stream transfer payload serializes"),
        );
        ack.correlation_id = vec![envelope.id.clone()];
        self.broadcast_system(ack);
        true
    }

    fn apply_stream_close(&mut self, envelope: &Envelope) -> bool {
        let payload: crate::envelope::StreamClosePayload =
            match serde_json::from_value(envelope.payload.clone()) {
                Ok(payload) => payload,
                Err(error) => {
                    self.reflect_invalid_payload(envelope, &error.to_string());
                    return false;
                }
            };
        // The paused allow-list admits `stream/close` for the participant's
        // OWN streams only; the kind-based gate cannot see the stream table,
        // so the ownership half of that rule is enforced here.
        let paused = self
            .registry
            .get(&envelope.from)
            .is_some_and(|r| r.lifecycle.is_paused());
        if paused {
            let owns = self
                .streams
                .get(&payload.stream_id)
                .is_some_and(|s| s.owner == envelope.from);
            if !owns {
                self.reflect_error(
                    &envelope.from.clone(),
                    Some(envelope.id.clone()),
                    ErrorPayload::new(
                        ErrorCode::Paused,
                        "a paused participant may only close streams it owns",
                    )
                    .with_attempted_kind(envelope.kind.clone()),
                );
                return false;
            }
        }
        if let Err(error) = self.streams.close(&payload.stream_id, &envelope.from) {
            self.reflect_error(
                &envelope.from.clone(),
                Some(envelope.id.clone()),
                ErrorPayload::new(error.code(), error.to_string())
                    .with_attempted_kind(envelope.kind.clone()),
            );
            return false;
        }
        true
    }

    // ── timers (C12 feedback) ───────────────────────────────────────────

    fn handle_timer(&mut self, class: TimerClass) {
        match class {
            TimerClass::PauseResume { participant_id } => {
                let paused = self
                    .registry
                    .get(&participant_id)
                    .is_some_and(|r| r.is_connected() && r.lifecycle.is_paused());
                if !paused {
                    return;
                }
                self.resume_participant(&participant_id);
                // Timer-driven resumes are announced so every orchestrator
                // sees the pause end.
                self.broadcast_system(Envelope::system(
                    kinds::PARTICIPANT_RESUME,
                    Vec::new(),
                    json!({"participant_id": participant_id, "reason": "pause-timeout"}),
                ));
            }
            TimerClass::CompactTimeout { participant_id } => {
                let compacting = self.registry.get(&participant_id).is_some_and(|r| {
                    r.is_connected() && r.lifecycle.state() == ParticipantState::Compacting
                });
                if compacting {
                    tracing::warn!(participant = %participant_id, "compact timed out");
                    self.apply_compact_done(&participant_id);
                }
            }
            TimerClass::ProposalExpiry { proposal_id } => {
                if let Some(notice) = self.proposals.expire(&proposal_id) {
                    // The note goes to the proposer only; the proposal is
                    // never withdrawn server-side.
                    self.deliver_system(Envelope::system(
                        kinds::SYSTEM_PROPOSAL_TIMEOUT,
                        vec![notice.proposer.clone()],
                        serde_json::to_value(ProposalTimeoutPayload {
                            proposal_id: notice.proposal_id,
                            opened_at: notice.opened_at,
                        })
                        .expect("timeout payload serializes"),
                    ));
                }
            }
            TimerClass::IdleReap { participant_id } => {
                if self.registry.is_connected(&participant_id) {
                    self.marked_for_disconnect
                        .push((participant_id, DisconnectReason::Idle));
                }
            }
            TimerClass::Heartbeat => {
                self.broadcast_system(Envelope::system(
                    kinds::SYSTEM_HEARTBEAT,
                    Vec::new(),
                    json!({"ts": Utc::now().to_rfc3339()}),
                ));
                if let Some(interval) = self.config.limits.heartbeat_interval() {
                    self.timers
                        .arm(Instant::now() + interval, TimerClass::Heartbeat);
                }
            }
        }
    }

    fn touch_idle(&mut self, participant_id: &str) {
        let Some(idle) = self.config.limits.idle_timeout() else {
            return;
        };
        if let Some(timer) = self.idle_timers.remove(participant_id) {
            self.timers.disarm(timer);
        }
        let timer = self.timers.arm(
            Instant::now() + idle,
            TimerClass::IdleReap {
                participant_id: participant_id.to_string(),
            },
        );
        self.idle_timers.insert(participant_id.to_string(), timer);
    }

    // ── delivery helpers ────────────────────────────────────────────────

    /// Queue one frame; a full or closed queue marks the recipient for
    /// disconnect so one slow reader never blocks the space.
    fn send_frame(&mut self, recipient: &str, frame: OutboundFrame) {
        let Some(sender) = self.registry.get(recipient).and_then(|r| r.outbound().cloned())
        else {
            return;
        };
        if sender.try_send(frame).is_err() {
            tracing::warn!(participant = %recipient, "outbound queue overflow; disconnecting");
            self.marked_for_disconnect
                .push((recipient.to_string(), DisconnectReason::Backpressure));
        }
    }

    /// Deliver a gateway-originated envelope to its addressed recipients
    /// (or everyone when broadcast). Gateway envelopes are delivery
    /// artifacts, not history entries.
    fn deliver_system(&mut self, envelope: Envelope) {
        self.normalizer.reserve_id(&envelope.id);
        let recipients: Vec<String> = if envelope.to.is_empty() {
            self.registry.connected_ids()
        } else {
            envelope
                .to
                .iter()
                .filter(|id| self.registry.is_connected(id))
                .cloned()
                .collect()
        };
        for recipient in recipients {
            self.send_frame(&recipient, OutboundFrame::Envelope(envelope.clone()));
        }
    }

    fn broadcast_system(&mut self, envelope: Envelope) {
        debug_assert!(envelope.to.is_empty());
        self.deliver_system(envelope);
    }

    /// Presence join is delivered to everyone except the subject (their
    /// welcome already covers them).
    fn broadcast_presence(&mut self, event: PresenceEvent, participant_id: &str) {
        let Some(view) = self.registry.get(participant_id).map(|r| r.view()) else {
            return;
        };
        let envelope = Envelope::system(
            kinds::SYSTEM_PRESENCE,
            Vec::new(),
            serde_json::to_value(PresencePayload {
                event,
                participant: view,
            })
            .expect("presence payload serializes"),
        );
        self.normalizer.reserve_id(&envelope.id);
        for recipient in self.registry.connected_ids() {
            if recipient == participant_id {
                continue;
            }
            self.send_frame(&recipient, OutboundFrame::Envelope(envelope.clone()));
        }
    }

    /// Gateway-originated status transition broadcast about a participant.
    fn broadcast_status(&mut self, participant_id: &str, state: &str, reason: Option<&str>) {
        let mut payload = json!({"participant_id": participant_id, "state": state});
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }
        self.broadcast_system(Envelope::system(
            kinds::PARTICIPANT_STATUS,
            Vec::new(),
            payload,
        ));
    }

    /// Send a `system/error` to the offending sender only. Errors are
    /// local to the interaction; they are never broadcast.
    fn reflect_error(
        &mut self,
        participant_id: &str,
        correlates_to: Option<String>,
        payload: ErrorPayload,
    ) {
        let mut envelope = Envelope::system(
            kinds::SYSTEM_ERROR,
            vec![participant_id.to_string()],
            serde_json::to_value(payload).expect("error payload serializes"),
        );
        if let Some(id) = correlates_to {
            envelope.correlation_id = vec![id];
        }
        self.deliver_system(envelope);
    }

    fn reflect_invalid_payload(&mut self, envelope: &Envelope, detail: &str) {
        self.reflect_error(
            &envelope.from.clone(),
            Some(envelope.id.clone()),
            ErrorPayload::new(
                ErrorCode::MalformedEnvelope,
                format!("invalid {} payload: {detail}", envelope.kind),
            )
            .with_attempted_kind(envelope.kind.clone()),
        );
    }

    fn flush_disconnects(&mut self) {
        // Removal happens before any reflection attempt: a participant is
        // marked here precisely because its queue cannot take more frames,
        // so a terminal error envelope would be undeliverable anyway.
        while let Some((participant_id, reason)) = self.marked_for_disconnect.pop() {
            if let DisconnectReason::Backpressure = reason {
                tracing::warn!(
                    participant = %participant_id,
                    code = %ErrorCode::BackpressureDisconnect,
                    "disconnecting overflowing participant"
                );
            }
            self.remove_participant(&participant_id, &reason);
        }
    }

    /// A weak snapshot of connected participants, for tests and tooling.
    pub fn connected_views(&self) -> Vec<ParticipantView> {
        self.registry
            .connected_ids()
            .iter()
            .filter_map(|id| self.registry.get(id).map(|r| r.view()))
            .collect()
    }
}
