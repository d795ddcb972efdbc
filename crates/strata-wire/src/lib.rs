//! # strata-wire
//!
//! Byte-exact wire codec for the strata overlay protocols.
//!
//! All control messages are length-delimited binary: big-endian multi-byte
//! integers, IPv4 addresses as 4 bytes in network order, strings as a u16
//! length followed by raw UTF-8 bytes (no terminator), vectors as a u16
//! count prefix. One message per UDP datagram; no padding anywhere. Every
//! payload defines its serialized size precisely and `encode` produces
//! exactly that many bytes after the header.
//!
//! Three message families share the conventions but not a header:
//!
//! - [`lsr`]: routing-control frames (tag, seq, TTL, originator, payload)
//! - [`chord`]: ring-maintenance and lookup frames (tag, transaction id)
//! - [`search`]: inverted-index transfer frames (tag, transaction id)
//!
//! Tag values are stable across implementations; decoding never mutates any
//! engine state, so a malformed frame is dropped without side effects.

pub mod chord;
pub mod lsr;
pub mod search;

pub(crate) mod util;

/// Error types for frame decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// The message-type byte is not a known tag for this family.
    #[error("unknown message tag {tag}")]
    UnknownTag { tag: u8 },

    /// The frame ended before the advertised payload was complete.
    #[error("truncated frame: needed {needed} more bytes")]
    Truncated { needed: usize },

    /// Bytes remained after the payload was fully decoded.
    #[error("frame has {extra} trailing bytes")]
    TrailingBytes { extra: usize },

    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    BadUtf8,
}

/// Convenience result type for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;
