//! Routing-control frames.
//!
//! ## Wire format
//!
//! ```text
//! LsrMessage {
//!     tag:        u8,      // message type (1..=5)
//!     seq:        u32,     // per-sender sequence / transaction number
//!     ttl:        u8,      // remaining hop budget
//!     originator: [u8; 4], // main address of the frame's author
//!     payload:    ...      // tag-discriminated, sizes below
//! }
//! ```
//!
//! Neighbor probes and pings share one payload shape; LSPs carry the
//! originator's neighbor list and their own 64-bit sequence number, which
//! orders topology views per originator independently of the header `seq`.

use std::net::Ipv4Addr;

use bytes::BufMut;

use crate::util::{
    expect_consumed, get_addr, get_string, get_u16, get_u32, get_u64, get_u8, put_addr,
    put_string, string_size,
};
use crate::{Result, WireError};

/// Message type for a routed ping request (1).
pub const TAG_PING_REQ: u8 = 1;
/// Message type for a routed ping response (2).
pub const TAG_PING_RSP: u8 = 2;
/// Message type for a single-hop neighbor probe (3).
pub const TAG_ND_REQ: u8 = 3;
/// Message type for a neighbor probe answer (4).
pub const TAG_ND_RSP: u8 = 4;
/// Message type for a link-state packet (5).
pub const TAG_LSP: u8 = 5;

/// Header size: tag + seq + ttl + originator.
const HEADER_SIZE: usize = 1 + 4 + 1 + 4;

/// A routing-control frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LsrMessage {
    /// Per-sender sequence number (duplicate matching for pings).
    pub seq: u32,
    /// Remaining hop budget. Probes use 1; floods start at the max.
    pub ttl: u8,
    /// Main address of the node that authored this frame. Preserved
    /// unchanged when an LSP is forwarded.
    pub originator: Ipv4Addr,
    /// Tag-discriminated payload.
    pub payload: LsrPayload,
}

/// Payloads for [`LsrMessage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LsrPayload {
    /// Ping request, routed hop-by-hop toward `dest`.
    PingReq(Probe),
    /// Ping response, routed back to the original requester.
    PingRsp(Probe),
    /// Neighbor-discovery probe, broadcast with TTL 1.
    NdReq(Probe),
    /// Neighbor-discovery answer, directed-broadcast on the arrival link.
    NdRsp(Probe),
    /// Link-state packet, flooded network-wide.
    Lsp(Lsp),
}

/// Shared shape of ping and neighbor-probe payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    /// Destination main address (ignored by ND, which is single-hop).
    pub dest: Ipv4Addr,
    /// Free-form operator or probe text, echoed in responses.
    pub msg: String,
}

/// A link-state packet: the originator's current neighbor set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lsp {
    /// Monotonic per-originator sequence number; higher supersedes lower.
    pub lsp_seq: u64,
    /// Main addresses of the originator's committed neighbors.
    pub neighbors: Vec<Ipv4Addr>,
    /// Unused destination field, kept for frame-format stability.
    pub dest: Ipv4Addr,
    /// Diagnostic text.
    pub msg: String,
}

impl Probe {
    fn serialized_size(&self) -> usize {
        4 + string_size(&self.msg)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_addr(buf, self.dest);
        put_string(buf, &self.msg);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Probe {
            dest: get_addr(buf)?,
            msg: get_string(buf)?,
        })
    }
}

impl Lsp {
    fn serialized_size(&self) -> usize {
        8 + 2 + 4 * self.neighbors.len() + 4 + string_size(&self.msg)
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u64(self.lsp_seq);
        buf.put_u16(self.neighbors.len() as u16);
        for neighbor in &self.neighbors {
            put_addr(buf, *neighbor);
        }
        put_addr(buf, self.dest);
        put_string(buf, &self.msg);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let lsp_seq = get_u64(buf)?;
        let count = usize::from(get_u16(buf)?);
        let mut neighbors = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            neighbors.push(get_addr(buf)?);
        }
        Ok(Lsp {
            lsp_seq,
            neighbors,
            dest: get_addr(buf)?,
            msg: get_string(buf)?,
        })
    }
}

impl LsrMessage {
    /// Message-type tag for this payload.
    pub fn tag(&self) -> u8 {
        match &self.payload {
            LsrPayload::PingReq(_) => TAG_PING_REQ,
            LsrPayload::PingRsp(_) => TAG_PING_RSP,
            LsrPayload::NdReq(_) => TAG_ND_REQ,
            LsrPayload::NdRsp(_) => TAG_ND_RSP,
            LsrPayload::Lsp(_) => TAG_LSP,
        }
    }

    /// Exact encoded length in bytes.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + match &self.payload {
                LsrPayload::PingReq(p)
                | LsrPayload::PingRsp(p)
                | LsrPayload::NdReq(p)
                | LsrPayload::NdRsp(p) => p.serialized_size(),
                LsrPayload::Lsp(lsp) => lsp.serialized_size(),
            }
    }

    /// Serialize to a fresh datagram buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.put_u8(self.tag());
        buf.put_u32(self.seq);
        buf.put_u8(self.ttl);
        put_addr(&mut buf, self.originator);
        match &self.payload {
            LsrPayload::PingReq(p)
            | LsrPayload::PingRsp(p)
            | LsrPayload::NdReq(p)
            | LsrPayload::NdRsp(p) => p.encode(&mut buf),
            LsrPayload::Lsp(lsp) => lsp.encode(&mut buf),
        }
        buf
    }

    /// Decode one datagram. The whole buffer must be consumed.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let buf = &mut buf;
        let tag = get_u8(buf)?;
        let seq = get_u32(buf)?;
        let ttl = get_u8(buf)?;
        let originator = get_addr(buf)?;
        let payload = match tag {
            TAG_PING_REQ => LsrPayload::PingReq(Probe::decode(buf)?),
            TAG_PING_RSP => LsrPayload::PingRsp(Probe::decode(buf)?),
            TAG_ND_REQ => LsrPayload::NdReq(Probe::decode(buf)?),
            TAG_ND_RSP => LsrPayload::NdRsp(Probe::decode(buf)?),
            TAG_LSP => LsrPayload::Lsp(Lsp::decode(buf)?),
            tag => return Err(WireError::UnknownTag { tag }),
        };
        expect_consumed(buf)?;
        Ok(LsrMessage {
            seq,
            ttl,
            originator,
            payload,
        })
    }
}
