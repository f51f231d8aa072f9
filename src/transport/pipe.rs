// ABOUTME: Length-prefixed pipe transport for subprocess and in-memory peers
// ABOUTME: Provides the server driver plus the client-side codec

//! The pipe transport.
//!
//! A pipe connection is a half-duplex inbound stream and a half-duplex
//! outbound stream (a subprocess's stdio, or a `tokio::io::duplex` pair in
//! tests). Frames are length-prefixed:
//!
//! ```text
//! [len: u32 BE][tag: u8][body: len-1 bytes]
//! ```
//!
//! Tag `0x00` carries one JSON envelope; tag `0x01` carries a binary stream
//! frame in the shared [`frame`](super::frame) layout.

use super::frame::{decode_stream_frame, encode_stream_frame, OutboundFrame};
use super::{handshake_rejection, JoinRequest};
use crate::constants::limits::MAX_ENVELOPE_BYTES;
use crate::constants::timeouts::HANDSHAKE_TIMEOUT;
use crate::envelope::{Envelope, NormalizeError, Normalizer};
use crate::error::{GatewayError, Result};
use crate::router::{DisconnectReason, SpaceHandle};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame tag for a JSON envelope.
const TAG_ENVELOPE: u8 = 0x00;
/// Frame tag for a binary stream frame.
const TAG_STREAM: u8 = 0x01;

/// Read one `(tag, body)` frame; `None` on clean EOF.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > max_len + 1 {
        return Err(GatewayError::transport(format!(
            "frame length {len} outside 1..={}",
            max_len + 1
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let tag = body.remove(0);
    Ok(Some((tag, body)))
}

/// Write one `(tag, body)` frame.
pub async fn write_frame<W>(writer: &mut W, tag: u8, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = (body.len() + 1) as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&[tag]).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Drive one pipe connection to completion.
///
/// Performs the handshake, then pumps frames both ways until either side
/// closes. The writer half runs as its own task draining the participant's
/// outbound queue.
pub async fn serve_pipe<R, W>(handle: SpaceHandle, mut read: R, mut write: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Handshake: first frame must be a JoinRequest envelope frame.
    let join = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut read, MAX_ENVELOPE_BYTES))
        .await
        .map_err(|_| GatewayError::transport("handshake timed out"))??;
    let Some((TAG_ENVELOPE, body)) = join else {
        return Err(GatewayError::transport("connection closed before handshake"));
    };
    let join: JoinRequest = match serde_json::from_slice(&body) {
        Ok(join) => join,
        Err(e) => {
            let rejection = handshake_rejection(&format!("malformed join: {e}"));
            write_frame(&mut write, TAG_ENVELOPE, &serde_json::to_vec(&rejection)?).await?;
            return Err(GatewayError::authentication("malformed join request"));
        }
    };

    let (participant_id, mut outbound) =
        match handle.connect(&join.token, join.participant.as_deref()).await {
            Ok(admitted) => admitted,
            Err(error) => {
                let rejection = handshake_rejection(&error.to_string());
                write_frame(&mut write, TAG_ENVELOPE, &serde_json::to_vec(&rejection)?).await?;
                return Err(error);
            }
        };
    tracing::debug!(participant = %participant_id, "pipe transport admitted");

    // Writer task: drain the outbound queue onto the pipe.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let result = match frame {
                OutboundFrame::Envelope(envelope) => match serde_json::to_vec(&envelope) {
                    Ok(body) => write_frame(&mut write, TAG_ENVELOPE, &body).await,
                    Err(e) => Err(e.into()),
                },
                OutboundFrame::Stream { stream_id, data } => {
                    match encode_stream_frame(&stream_id, &data) {
                        Ok(body) => write_frame(&mut write, TAG_STREAM, &body).await,
                        Err(e) => Err(e),
                    }
                }
            };
            if result.is_err() {
                break;
            }
        }
        let _ = write.shutdown().await;
    });

    // Reader loop: parse frames and feed the router queue.
    let max_frame = handle.max_frame_bytes().max(MAX_ENVELOPE_BYTES);
    loop {
        match read_frame(&mut read, max_frame).await {
            Ok(Some((TAG_ENVELOPE, body))) => match Normalizer::parse(&body) {
                Ok(raw) => handle.inbound(&participant_id, raw).await,
                Err(error) => handle.inbound_invalid(&participant_id, error).await,
            },
            Ok(Some((TAG_STREAM, body))) => match decode_stream_frame(&body) {
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
            Ok(Some((tag, _))) => {
                handle
                    .inbound_invalid(
                        &participant_id,
                        NormalizeError::Malformed(format!("unknown frame tag {tag:#04x}")),
                    )
                    .await
            }
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(participant = %participant_id, %error, "pipe read failed");
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

/// What a pipe client receives.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Envelope(Envelope),
    Stream { stream_id: String, data: Bytes },
}

/// Client-side codec for the pipe transport.
///
/// Used by locally spawned participants and by the integration tests to
/// speak to the gateway over an in-memory duplex pair.
pub struct PipeClient<R, W> {
    read: R,
    write: W,
}

impl<R, W> PipeClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Send the join handshake and return the connected client.
    pub async fn connect(
        read: R,
        mut write: W,
        token: &str,
        participant: Option<&str>,
    ) -> Result<Self> {
        let join = JoinRequest {
            token: token.to_string(),
            participant: participant.map(String::from),
        };
        write_frame(&mut write, TAG_ENVELOPE, &serde_json::to_vec(&join)?).await?;
        Ok(Self { read, write })
    }

    /// Send one envelope document as the gateway will see it.
    pub async fn send_json(&mut self, envelope: &serde_json::Value) -> Result<()> {
        write_frame(&mut self.write, TAG_ENVELOPE, &serde_json::to_vec(envelope)?).await
    }

    /// Send a binary stream frame.
    pub async fn send_stream_frame(&mut self, stream_id: &str, data: &[u8]) -> Result<()> {
        let body = encode_stream_frame(stream_id, data)?;
        write_frame(&mut self.write, TAG_STREAM, &body).await
    }

    /// Receive the next frame; `None` when the gateway closed the pipe.
    pub async fn recv(&mut self) -> Result<Option<ClientFrame>> {
        match read_frame(&mut self.read, MAX_ENVELOPE_BYTES * 8).await? {
            None => Ok(None),
            Some((TAG_ENVELOPE, body)) => {
                let envelope: Envelope = serde_json::from_slice(&body)?;
                Ok(Some(ClientFrame::Envelope(envelope)))
            }
            Some((TAG_STREAM, body)) => {
                let (stream_id, data) = decode_stream_frame(&body)?;
                Ok(Some(ClientFrame::Stream { stream_id, data }))
            }
            Some((tag, _)) => Err(GatewayError::transport(format!(
                "unknown frame tag {tag:#04x}"
            ))),
        }
    }
}
