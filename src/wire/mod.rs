//! Wire layer for Crucible
//!
//! Owns the exact byte layout of everything that crosses the engine
//! boundary: the six-variant reply type, the tag-length-value reply
//! encoding, the KEYS/ARGV argument-array encoding, and the two pointer
//! plus length return conventions. No memory ownership, no I/O.

mod codec;
mod ptrlen;
mod reply;

pub use codec::{
    decode_args, decode_reply, encode_args, encode_reply, encoded_reply_len, CodecError,
};
pub use ptrlen::PtrLen;
pub use reply::Reply;
