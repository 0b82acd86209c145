//! Message framing.
//!
//! Every message after startup is a tagged frame:
//!
//! ```text
//! Byte1  message type
//! Int32  length of message contents in bytes, including self
//! Byte*  body
//! ```
//!
//! The length is patched after the body is written, so writers never need to know the body
//! size up front.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::ProtocolError;
use crate::ext::UsizeExt;

/// Message type and length prefix.
pub const HEADER_LEN: usize = 1 + 4;

/// A single backend message, undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message type.
    pub msgtype: u8,
    /// Message body, excluding type and length.
    pub body: Bytes,
}

/// Write a tagged frame with the given body.
pub fn encode(msgtype: u8, body: &[u8], buf: &mut BytesMut) {
    write_with(Some(msgtype), buf, |buf| buf.put_slice(body));
}

/// Write a length prefixed message, the body is written by `f`.
///
/// If `msgtype` is `None`, no type byte is written, which is the case for startup message.
pub(crate) fn write_with<F>(msgtype: Option<u8>, buf: &mut BytesMut, f: F)
where
    F: FnOnce(&mut BytesMut),
{
    if let Some(msgtype) = msgtype {
        buf.put_u8(msgtype);
    }

    // reserve 4 bytes for length
    let offset = buf.len();
    buf.put_u32(0);

    f(buf);

    let len = (buf.len() - offset).to_u32();
    buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
}

/// Try to split one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet contain a complete frame, in which case
/// enough capacity is reserved for the rest of the frame.
///
/// Body larger than `max_len` is rejected before any allocation.
pub fn decode(buf: &mut BytesMut, max_len: usize) -> Result<Option<Frame>, ProtocolError> {
    let Some(mut header) = buf.get(..HEADER_LEN) else {
        return Ok(None);
    };

    let msgtype = header.get_u8();
    let len = header.get_u32();

    let Some(body_len) = len.checked_sub(4) else {
        return Err(ProtocolError::InvalidLength { len });
    };
    let body_len = body_len as usize;

    if body_len > max_len {
        return Err(ProtocolError::TooLarge { len: body_len, max: max_len });
    }

    if buf.len() < HEADER_LEN + body_len {
        buf.reserve(HEADER_LEN + body_len - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let body = buf.split_to(body_len).freeze();

    Ok(Some(Frame { msgtype, body }))
}
