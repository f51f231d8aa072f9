// ABOUTME: WebSocket transport listener and per-connection driver
// ABOUTME: Text messages carry envelopes, binary messages carry stream frames

//! The WebSocket transport.
//!
//! A full-duplex connection for remote participants. Text messages carry
//! one JSON envelope each; binary messages carry stream frames in the
//! shared layout. The first text message must be the [`JoinRequest`]
//! handshake.

use super::frame::{decode_stream_frame, encode_stream_frame, OutboundFrame};
use super::{handshake_rejection, JoinRequest};
use crate::config::ListenerConfig;
use crate::constants::timeouts::HANDSHAKE_TIMEOUT;
use crate::envelope::{NormalizeError, Normalizer};
use crate::error::{GatewayError, Result};
use crate::router::{DisconnectReason, SpaceHandle};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// WebSocket listener for a space.
pub struct WebSocketServer {
    config: ListenerConfig,
    handle: SpaceHandle,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl WebSocketServer {
    pub fn new(config: ListenerConfig, handle: SpaceHandle) -> Self {
        Self {
            config,
            handle,
            shutdown_tx: None,
        }
    }

    /// Bind and accept connections until shut down.
    pub async fn start(&mut self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            GatewayError::transport(format!("failed to bind {bind_addr}: {e}"))
        })?;
        tracing::info!("gateway listening on ws://{bind_addr}");

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::info!("websocket listener shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            tracing::debug!(%addr, "new websocket connection");
                            let handle = self.handle.clone();
                            tokio::spawn(async move {
                                if let Err(error) = serve_connection(handle, stream).await {
                                    tracing::debug!(%addr, %error, "websocket connection ended");
                                }
                            });
                        }
                        Err(error) => {
                            tracing::error!(%error, "failed to accept connection");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Stop accepting connections. Existing connections drain on their own.
    pub fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Drive one accepted TCP connection through handshake and frame pumping.
pub async fn serve_connection(handle: SpaceHandle, stream: TcpStream) -> Result<()> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| GatewayError::transport(format!("websocket handshake failed: {e}")))?;
    serve_socket(handle, ws).await
}

/// Transport driver shared by plain and test sockets.
pub async fn serve_socket<S>(handle: SpaceHandle, ws: WebSocketStream<S>) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = ws.split();

    // Handshake: the first text message is the join request.
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, source.next())
        .await
        .map_err(|_| GatewayError::transport("handshake timed out"))?;
    let join = match first {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<JoinRequest>(text.as_str()) {
            Ok(join) => join,
            Err(e) => {
                let rejection = handshake_rejection(&format!("malformed join: {e}"));
                let _ = sink
                    .send(Message::Text(serde_json::to_string(&rejection)?.into()))
                    .await;
                let _ = sink.close().await;
                return Err(GatewayError::authentication("malformed join request"));
            }
        },
        _ => return Err(GatewayError::transport("connection closed before handshake")),
    };

    let (participant_id, mut outbound) =
        match handle.connect(&join.token, join.participant.as_deref()).await {
            Ok(admitted) => admitted,
            Err(error) => {
                let rejection = handshake_rejection(&error.to_string());
                let _ = sink
                    .send(Message::Text(serde_json::to_string(&rejection)?.into()))
                    .await;
                let _ = sink.close().await;
                return Err(error);
            }
        };
    tracing::debug!(participant = %participant_id, "websocket transport admitted");

    // Writer task: drain the outbound queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                OutboundFrame::Envelope(envelope) => match serde_json::to_string(&envelope) {
                    Ok(text) => Message::Text(text.into()),
                    Err(_) => continue,
                },
                OutboundFrame::Stream { stream_id, data } => {
                    match encode_stream_frame(&stream_id, &data) {
                        Ok(body) => Message::Binary(body),
                        Err(_) => continue,
                    }
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader loop.
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match Normalizer::parse(text.as_str().as_bytes()) {
                Ok(raw) => handle.inbound(&participant_id, raw).await,
                Err(error) => handle.inbound_invalid(&participant_id, error).await,
            },
            Ok(Message::Binary(body)) => match decode_stream_frame(&body) {
                Ok((stream_id, data)) => {
                    handle.stream_frame(&participant_id, stream_id, data).await
                }
                Err(error) => {
                    handle
                        .inbound_invalid(
                            &participant_id,
                            NormalizeError::Malformed(error.to_string()),
                        )
                        .await
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong handled by the protocol layer
            Err(error) => {
                tracing::debug!(participant = %participant_id, %error, "websocket read failed");
                break;
            }
        }
    }

    handle
        .disconnect(&participant_id, DisconnectReason::Transport)
        .await;
    writer.abort();
    Ok(())
}
