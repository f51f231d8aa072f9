// ABOUTME: Wire frame model shared by both transports
// ABOUTME: Text frames carry JSON envelopes, binary frames carry tagged stream data

//! Wire frames.
//!
//! Two frame shapes cross every connection: a text frame carrying one JSON
//! envelope, and a binary frame carrying opaque stream data tagged with a
//! stream id. Binary frames are deliberately NOT envelopes — they bypass the
//! JSON parser entirely and the router authorizes them with an O(1) stream
//! table lookup.
//!
//! Binary layout: `[id_len: u8][stream_id: id_len bytes][payload ...]`.

use crate::error::{GatewayError, Result};
use bytes::Bytes;

/// A frame queued for delivery to a participant.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Envelope(crate::envelope::Envelope),
    Stream { stream_id: String, data: Bytes },
}

/// Encode a binary stream frame.
pub fn encode_stream_frame(stream_id: &str, data: &[u8]) -> Result<Bytes> {
    let id = stream_id.as_bytes();
    if id.is_empty() || id.len() > u8::MAX as usize {
        return Err(GatewayError::transport(format!(
            "stream id length {} outside 1..=255",
            id.len()
        )));
    }
    let mut out = Vec::with_capacity(1 + id.len() + data.len());
    out.push(id.len() as u8);
    out.extend_from_slice(id);
    out.extend_from_slice(data);
    Ok(Bytes::from(out))
}

/// Decode a binary stream frame into `(stream_id, payload)`.
pub fn decode_stream_frame(frame: &[u8]) -> Result<(String, Bytes)> {
    let (&id_len, rest) = frame
        .split_first()
        .ok_or_else(|| GatewayError::transport("empty binary frame"))?;
    let id_len = id_len as usize;
    if id_len == 0 || rest.len() < id_len {
        return Err(GatewayError::transport("binary frame shorter than its stream id"));
    }
    let stream_id = std::str::from_utf8(&rest[..id_len])
        .map_err(|_| GatewayError::transport("stream id is not UTF-8"))?
        .to_string();
    Ok((stream_id, Bytes::copy_from_slice(&rest[id_len..])))
}
