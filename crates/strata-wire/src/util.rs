//! Checked big-endian read/write primitives shared by the three codecs.
//!
//! `bytes::Buf` panics on underrun, so every read goes through a bounds
//! check here and surfaces [`WireError::Truncated`] instead.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};
use strata_types::{RingId, DIGEST_LEN};

use crate::{Result, WireError};

pub(crate) fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(WireError::Truncated {
            needed: n - buf.remaining(),
        })
    } else {
        Ok(())
    }
}

pub(crate) fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub(crate) fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub(crate) fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

pub(crate) fn get_addr(buf: &mut &[u8]) -> Result<Ipv4Addr> {
    Ok(Ipv4Addr::from(get_u32(buf)?))
}

pub(crate) fn put_addr(buf: &mut Vec<u8>, addr: Ipv4Addr) {
    buf.put_u32(u32::from(addr));
}

pub(crate) fn get_digest(buf: &mut &[u8]) -> Result<RingId> {
    need(buf, DIGEST_LEN)?;
    let mut digest = [0u8; DIGEST_LEN];
    buf.copy_to_slice(&mut digest);
    Ok(RingId(digest))
}

pub(crate) fn put_digest(buf: &mut Vec<u8>, id: &RingId) {
    buf.put_slice(&id.0);
}

/// u16 length prefix, then raw UTF-8 bytes.
pub(crate) fn get_string(buf: &mut &[u8]) -> Result<String> {
    let len = usize::from(get_u16(buf)?);
    need(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| WireError::BadUtf8)
}

pub(crate) fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

pub(crate) fn string_size(s: &str) -> usize {
    2 + s.len()
}

/// u16 count prefix, then length-prefixed strings.
pub(crate) fn get_string_vec(buf: &mut &[u8]) -> Result<Vec<String>> {
    let count = usize::from(get_u16(buf)?);
    let mut out = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        out.push(get_string(buf)?);
    }
    Ok(out)
}

pub(crate) fn put_string_vec(buf: &mut Vec<u8>, items: &[String]) {
    buf.put_u16(items.len() as u16);
    for item in items {
        put_string(buf, item);
    }
}

pub(crate) fn string_vec_size(items: &[String]) -> usize {
    2 + items.iter().map(|s| string_size(s)).sum::<usize>()
}

/// Reject frames with bytes left over after the payload.
pub(crate) fn expect_consumed(buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(WireError::TrailingBytes { extra: buf.len() })
    }
}
