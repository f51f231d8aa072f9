// ABOUTME: Shared fixtures for gateway integration tests
// ABOUTME: Runs a real space and speaks to it over in-memory pipe transports

//! Test fixtures: a running space plus pipe-transport clients.
//!
//! Every integration test drives the gateway end to end — handshake,
//! framing, router, delivery — over `tokio::io::duplex` pairs, exactly the
//! pipe transport a spawned subprocess would use.

#![allow(dead_code)]

use mew_protocol::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A running space under test.
pub struct TestSpace {
    pub handle: SpaceHandle,
    pub router: JoinHandle<()>,
}

impl TestSpace {
    pub async fn start(config: SpaceConfig) -> Self {
        let (handle, router) = Router::spawn(config).expect("space spawns");
        Self { handle, router }
    }
}

/// Build a participant config entry.
pub fn participant(id: &str, capabilities: Vec<Capability>) -> ParticipantConfig {
    ParticipantConfig {
        id: id.to_string(),
        tokens: vec![format!("{id}-token")],
        capabilities,
        default_chat_to: None,
        command: None,
        args: Vec::new(),
        transport: None,
    }
}

/// A space where every named participant may send every listed kind.
pub fn space_with(participants: Vec<ParticipantConfig>) -> SpaceConfig {
    SpaceConfig {
        name: Some("test-space".to_string()),
        participants,
        listener: None,
        limits: LimitsConfig::default(),
        history_file: None,
    }
}

pub fn cap(kind: &str) -> Capability {
    Capability::kind_only(kind)
}

/// One connected pipe-transport client.
pub struct TestClient {
    pub id: String,
    client: PipeClient<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>,
    transport: JoinHandle<()>,
}

impl TestClient {
    /// Connect through the full pipe transport stack and consume the
    /// welcome, which is asserted to be the very first envelope.
    pub async fn join(space: &TestSpace, id: &str) -> Self {
        let mut client = Self::join_raw(space, &format!("{id}-token"), Some(id)).await;
        let welcome = client.recv_envelope().await;
        assert_eq!(welcome.kind, "system/welcome", "welcome must precede everything");
        client
    }

    /// Connect and return without waiting for any envelope.
    pub async fn join_raw(space: &TestSpace, token: &str, hint: Option<&str>) -> Self {
        let (client_end, server_end) = tokio::io::duplex(1 << 20);
        let (server_read, server_write) = tokio::io::split(server_end);
        let handle = space.handle.clone();
        let transport = tokio::spawn(async move {
            let _ = mew_protocol::transport::pipe::serve_pipe(handle, server_read, server_write)
                .await;
        });

        let (client_read, client_write) = tokio::io::split(client_end);
        let client = PipeClient::connect(client_read, client_write, token, hint)
            .await
            .expect("handshake frame written");

        Self {
            id: hint.unwrap_or("<unhinted>").to_string(),
            client,
            transport,
        }
    }

    /// Send a raw envelope document.
    pub async fn send(&mut self, envelope: Value) {
        self.client.send_json(&envelope).await.expect("send succeeds");
    }

    /// Send a binary stream frame.
    pub async fn send_stream(&mut self, stream_id: &str, data: &[u8]) {
        self.client
            .send_stream_frame(stream_id, data)
            .await
            .expect("stream frame written");
    }

    /// Next frame of any shape.
    pub async fn recv_frame(&mut self) -> ClientFrame {
        tokio::time::timeout(RECV_TIMEOUT, self.client.recv())
            .await
            .expect("frame before timeout")
            .expect("transport healthy")
            .expect("connection open")
    }

    /// Next envelope (panics on a stream frame).
    pub async fn recv_envelope(&mut self) -> Envelope {
        match self.recv_frame().await {
            ClientFrame::Envelope(envelope) => envelope,
            ClientFrame::Stream { stream_id, .. } => {
                panic!("expected envelope, got stream frame for {stream_id}")
            }
        }
    }

    /// Skip frames until an envelope of `kind` arrives.
    pub async fn recv_kind(&mut self, kind: &str) -> Envelope {
        loop {
            if let ClientFrame::Envelope(envelope) = self.recv_frame().await {
                if envelope.kind == kind {
                    return envelope;
                }
            }
        }
    }

    /// Skip frames until a binary frame for `stream_id` arrives.
    pub async fn recv_stream(&mut self, stream_id: &str) -> Vec<u8> {
        loop {
            if let ClientFrame::Stream {
                stream_id: got,
                data,
            } = self.recv_frame().await
            {
                if got == stream_id {
                    return data.to_vec();
                }
            }
        }
    }

    /// Assert that no envelope of `kind` arrives within `window`. Other
    /// traffic (presence, acknowledgements) is tolerated and discarded.
    pub async fn assert_no_kind(&mut self, kind: &str, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, self.client.recv()).await {
                Err(_) | Ok(Ok(None)) | Ok(Err(_)) => return,
                Ok(Ok(Some(ClientFrame::Envelope(envelope)))) => {
                    assert_ne!(
                        envelope.kind, kind,
                        "expected no {kind} envelope, but one arrived"
                    );
                }
                Ok(Ok(Some(ClientFrame::Stream { .. }))) => {}
            }
        }
    }

    /// Assert that no binary frame for `stream_id` arrives within `window`.
    pub async fn assert_no_stream(&mut self, stream_id: &str, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, self.client.recv()).await {
                Err(_) | Ok(Ok(None)) | Ok(Err(_)) => return,
                Ok(Ok(Some(ClientFrame::Stream { stream_id: got, .. }))) => {
                    assert_ne!(got, stream_id, "expected no frame for stream {stream_id}");
                }
                Ok(Ok(Some(ClientFrame::Envelope(_)))) => {}
            }
        }
    }

    /// Assert that nothing arrives for `window`.
    pub async fn assert_silent(&mut self, window: Duration) {
        match tokio::time::timeout(window, self.client.recv()).await {
            Err(_) => {}
            Ok(Ok(Some(ClientFrame::Envelope(envelope)))) => {
                panic!("expected silence, got {} envelope", envelope.kind)
            }
            Ok(Ok(Some(ClientFrame::Stream { stream_id, .. }))) => {
                panic!("expected silence, got stream frame for {stream_id}")
            }
            Ok(Ok(None)) => panic!("expected silence, got disconnect"),
            Ok(Err(error)) => panic!("expected silence, got transport error: {error}"),
        }
    }

    /// Close the connection by dropping the client end of the pipe; the
    /// transport task observes EOF and reports the disconnect.
    pub fn close(self) {
        drop(self.client);
        drop(self.transport);
    }
}

/// Build an envelope document the way a client would.
pub fn wire(kind: &str, to: Vec<&str>, payload: Value) -> Value {
    let mut envelope = json!({
        "protocol": "mew/v0.4",
        "kind": kind,
        "payload": payload,
    });
    if !to.is_empty() {
        envelope["to"] = json!(to);
    }
    envelope
}

/// Same as [`wire`] with an explicit client-chosen id.
pub fn wire_with_id(kind: &str, id: &str, to: Vec<&str>, payload: Value) -> Value {
    let mut envelope = wire(kind, to, payload);
    envelope["id"] = json!(id);
    envelope
}

/// Same as [`wire`] with a correlation sequence.
pub fn wire_correlated(kind: &str, correlation: Vec<&str>, to: Vec<&str>, payload: Value) -> Value {
    let mut envelope = wire(kind, to, payload);
    envelope["correlation_id"] = json!(correlation);
    envelope
}
