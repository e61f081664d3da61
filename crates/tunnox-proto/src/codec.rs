//! Length-prefixed framing: 4-byte big-endian length, then payload.
//!
//! Used wherever an explicit datagram boundary is needed (the handshake
//! control stream, and the UDP adapter's optional framing) — the bridge's
//! data-plane pump itself never frames (spec.md §6).

use crate::messages::TunnelMessage;
use bytes::{Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("payload too large: {0} bytes (max {max})", max = FrameCodec::MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
}

/// Encodes/decodes `TunnelMessage`s as `[len: u32 BE][bincode payload]`.
pub struct FrameCodec;

impl FrameCodec {
    /// Maximum payload size per spec.md §6 (applies to UDP datagram
    /// framing and the handshake control stream alike).
    pub const MAX_PAYLOAD_SIZE: usize = 65_535;

    pub fn encode(msg: &TunnelMessage) -> Result<Bytes, CodecError> {
        let payload = bincode::serialize(msg)?;
        if payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }

        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf.freeze())
    }

    /// Returns `Ok(None)` if `buf` does not yet hold a complete frame.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<TunnelMessage>, CodecError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > Self::MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge(len));
        }
        if buf.len() < 4 + len {
            return Ok(None);
        }

        let _ = buf.split_to(4);
        let payload = buf.split_to(len);
        let msg = bincode::deserialize(&payload)?;
        Ok(Some(msg))
    }
}
