//! Reply and argument-array byte layout
//!
//! A reply record is `u8 tag ‖ u32le count_or_len ‖ payload`. An argument
//! array is `u32le count ‖ { u32le len ‖ len bytes } × count`. All multibyte
//! integers are little-endian. Payload lengths are bounded by the u32 length
//! field; the engine's reply-size cap keeps real traffic far below that.

use super::reply::Reply;
use thiserror::Error;

const TAG_NULL: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_BULK: u8 = 0x02;
const TAG_ARRAY: u8 = 0x03;
const TAG_STATUS: u8 = 0x04;
const TAG_ERROR: u8 = 0x05;

/// Nesting guard for the decoder. Encoded input is untrusted; without a
/// bound, a long run of array headers would overflow the host stack long
/// before it exhausted the buffer.
const MAX_DEPTH: usize = 128;

/// Decoder failures. The `Display` form is the reply message the host sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Truncation at any boundary, trailing bytes, or over-deep nesting
    #[error("ERR reply decoding failed")]
    Malformed,

    /// Unrecognized reply tag
    #[error("ERR unknown reply type")]
    UnknownTag(u8),
}

/// Encode a reply into its wire form.
pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_reply_len(reply) as usize);
    write_reply(reply, &mut out);
    out
}

fn write_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Null => {
            out.push(TAG_NULL);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        Reply::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&8u32.to_le_bytes());
            out.extend_from_slice(&n.to_le_bytes());
        }
        Reply::Bulk(bytes) => write_bytes(TAG_BULK, bytes, out),
        Reply::Status(bytes) => write_bytes(TAG_STATUS, bytes, out),
        Reply::Error(bytes) => write_bytes(TAG_ERROR, bytes, out),
        Reply::Array(items) => {
            debug_assert!(items.len() <= u32::MAX as usize);
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write_reply(item, out);
            }
        }
    }
}

fn write_bytes(tag: u8, bytes: &[u8], out: &mut Vec<u8>) {
    debug_assert!(bytes.len() <= u32::MAX as usize);
    out.push(tag);
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Size of a reply's wire form without building it. Used to enforce the
/// reply-size cap before committing to an allocation.
pub fn encoded_reply_len(reply: &Reply) -> u64 {
    match reply {
        Reply::Null => 5,
        Reply::Int(_) => 13,
        Reply::Bulk(bytes) | Reply::Status(bytes) | Reply::Error(bytes) => 5 + bytes.len() as u64,
        Reply::Array(items) => 5 + items.iter().map(encoded_reply_len).sum::<u64>(),
    }
}

/// Decode a single reply record occupying the whole buffer.
pub fn decode_reply(buf: &[u8]) -> Result<Reply, CodecError> {
    let (reply, consumed) = read_reply(buf, 0)?;
    if consumed != buf.len() {
        return Err(CodecError::Malformed);
    }
    Ok(reply)
}

fn read_reply(buf: &[u8], depth: usize) -> Result<(Reply, usize), CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::Malformed);
    }
    if buf.len() < 5 {
        return Err(CodecError::Malformed);
    }
    let tag = buf[0];
    let count_or_len = read_u32(&buf[1..5]) as usize;
    let body = &buf[5..];

    match tag {
        TAG_NULL => Ok((Reply::Null, 5)),
        TAG_INT => {
            // The length field is nominally the fixed value 8; accept
            // whatever the writer put there and read the 8 payload bytes.
            if body.len() < 8 {
                return Err(CodecError::Malformed);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&body[..8]);
            Ok((Reply::Int(i64::from_le_bytes(raw)), 13))
        }
        TAG_BULK | TAG_STATUS | TAG_ERROR => {
            if body.len() < count_or_len {
                return Err(CodecError::Malformed);
            }
            let bytes = body[..count_or_len].to_vec();
            let reply = match tag {
                TAG_BULK => Reply::Bulk(bytes),
                TAG_STATUS => Reply::Status(bytes),
                _ => Reply::Error(bytes),
            };
            Ok((reply, 5 + count_or_len))
        }
        TAG_ARRAY => {
            let mut items = Vec::new();
            let mut offset = 5;
            for _ in 0..count_or_len {
                let (item, used) = read_reply(&buf[offset..], depth + 1)?;
                items.push(item);
                offset += used;
            }
            Ok((Reply::Array(items), offset))
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

/// Encode an argument array (KEYS/ARGV input, or a `redis.call` vector).
pub fn encode_args(args: &[Vec<u8>]) -> Vec<u8> {
    let payload: usize = args.iter().map(|a| 4 + a.len()).sum();
    let mut out = Vec::with_capacity(4 + payload);
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        debug_assert!(arg.len() <= u32::MAX as usize);
        out.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        out.extend_from_slice(arg);
    }
    out
}

/// Decode an argument array occupying the whole buffer.
pub fn decode_args(buf: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::Malformed);
    }
    let count = read_u32(&buf[..4]) as usize;
    let mut offset = 4;
    let mut args = Vec::new();
    for _ in 0..count {
        if buf.len() < offset + 4 {
            return Err(CodecError::Malformed);
        }
        let len = read_u32(&buf[offset..offset + 4]) as usize;
        offset += 4;
        if buf.len() < offset + len {
            return Err(CodecError::Malformed);
        }
        args.push(buf[offset..offset + len].to_vec());
        offset += len;
    }
    if offset != buf.len() {
        return Err(CodecError::Malformed);
    }
    Ok(args)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}
