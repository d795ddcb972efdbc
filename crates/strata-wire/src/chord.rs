//! Ring-maintenance and lookup frames.
//!
//! ## Wire format
//!
//! ```text
//! ChordMessage {
//!     tag: u8,   // message type (1..=16)
//!     txn: u32,  // transaction id, echoed in responses
//!     payload: ...
//! }
//! ```
//!
//! Tag values are part of the protocol and must not be renumbered: peers
//! running other implementations dispatch on them. An all-zero address on
//! the wire (`0.0.0.0`) stands for "no such node" wherever a predecessor or
//! successor slot may be empty.

use std::net::Ipv4Addr;

use bytes::BufMut;
use strata_types::RingId;

use crate::util::{
    expect_consumed, get_addr, get_digest, get_string, get_u16, get_u32, get_u8, put_addr,
    put_digest, put_string, string_size,
};
use crate::{Result, WireError};

/// Message type for a ping request (1).
pub const TAG_PING_REQ: u8 = 1;
/// Message type for a ping response (2).
pub const TAG_PING_RSP: u8 = 2;
/// Message type for a join request (3).
pub const TAG_JOIN_CHORD: u8 = 3;
/// Message type for a recursive successor query (4).
pub const TAG_FIND_SUCCESSOR: u8 = 4;
/// Message type for a successful join / successor answer (5).
pub const TAG_JOIN_CHORD_SUCCESS: u8 = 5;
/// Message type for a refused join (6).
pub const TAG_JOIN_CHORD_FAIL: u8 = 6;
/// Message type for a predecessor-candidate notification (7).
pub const TAG_NOTIFY: u8 = 7;
/// Message type for a stabilize query (8).
pub const TAG_STABILIZE_REQ: u8 = 8;
/// Message type for a stabilize answer (9).
pub const TAG_STABILIZE_RESP: u8 = 9;
/// Message type for a ring-walk report frame (10).
pub const TAG_RINGSTATE: u8 = 10;
/// Message type for a leave notice to the successor (11).
pub const TAG_LEAVE_SUCCESSOR: u8 = 11;
/// Message type for a leave notice to the predecessor (12).
pub const TAG_LEAVE_PREDECESSOR: u8 = 12;
/// Message type for a finger query (13).
pub const TAG_FIND_FINGER: u8 = 13;
/// Message type for a finger answer (14).
pub const TAG_FIND_FINGER_SUCCESS: u8 = 14;
/// Message type for a key lookup (15).
pub const TAG_LOOKUP: u8 = 15;
/// Message type for a key lookup answer (16).
pub const TAG_LOOKUP_SUCCESS: u8 = 16;

/// Header size: tag + transaction id.
const HEADER_SIZE: usize = 1 + 4;

/// A ring-control frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChordMessage {
    /// Transaction id; responses echo the id of the request they answer.
    pub txn: u32,
    /// Tag-discriminated payload.
    pub payload: ChordPayload,
}

/// Payloads for [`ChordMessage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChordPayload {
    /// Liveness/RTT probe.
    PingReq {
        /// Free-form text echoed in the response.
        msg: String,
    },
    /// Echo of a ping request.
    PingRsp {
        /// The echoed text.
        msg: String,
    },
    /// Ask the receiver to admit the sender to its ring.
    JoinChord,
    /// Recursive successor query on behalf of `dest`.
    FindSuccessor {
        /// Node the final answer is sent to.
        dest: Ipv4Addr,
        /// The id whose successor is sought.
        target: RingId,
    },
    /// Successor answer, delivered directly to the original requester.
    JoinChordSuccess {
        /// The requester's successor on the ring.
        successor: Ipv4Addr,
    },
    /// The contacted node is itself detached.
    JoinChordFail,
    /// "I might be your predecessor."
    Notify,
    /// "Who is your predecessor?"
    StabilizeReq,
    /// Answer to [`ChordPayload::StabilizeReq`].
    StabilizeResp {
        /// The responder's predecessor, or `0.0.0.0` when unknown.
        predecessor: Ipv4Addr,
    },
    /// Ring-walk frame; forwarded successor-to-successor until it returns
    /// to the initiator.
    Ringstate {
        /// The node that started the walk.
        initiator: Ipv4Addr,
    },
    /// Leave notice sent to the departing node's successor.
    LeaveSuccessor {
        /// The departing node's predecessor, or `0.0.0.0` in a 2-ring.
        predecessor: Ipv4Addr,
    },
    /// Leave notice sent to the departing node's predecessor.
    LeavePredecessor {
        /// The departing node's successor.
        successor: Ipv4Addr,
    },
    /// Recursive finger query for table slot `index`.
    FindFinger {
        /// Node the answer is sent to.
        dest: Ipv4Addr,
        /// The finger-target id.
        target: RingId,
        /// Finger slot being fixed (1..=160).
        index: u16,
    },
    /// Finger answer, delivered directly to the querying node.
    FindFingerSuccess {
        /// The node responsible for the finger target.
        finger: Ipv4Addr,
        /// The slot the answer belongs to.
        index: u16,
    },
    /// Recursive key lookup issued by the search layer.
    Lookup {
        /// Callback selector: 0 publish, 1 search-initial, 2 search-step.
        flag: u16,
        /// Node the final answer is sent to.
        initiator: Ipv4Addr,
        /// SHA-1 of `key`.
        target: RingId,
        /// The key being located.
        key: String,
    },
    /// Lookup answer, delivered directly to the initiator.
    LookupSuccess {
        /// Echo of the request flag.
        flag: u16,
        /// The node responsible for the key.
        responsible: Ipv4Addr,
        /// Echo of the key.
        key: String,
    },
}

impl ChordMessage {
    /// Message-type tag for this payload.
    pub fn tag(&self) -> u8 {
        match &self.payload {
            ChordPayload::PingReq { .. } => TAG_PING_REQ,
            ChordPayload::PingRsp { .. } => TAG_PING_RSP,
            ChordPayload::JoinChord => TAG_JOIN_CHORD,
            ChordPayload::FindSuccessor { .. } => TAG_FIND_SUCCESSOR,
            ChordPayload::JoinChordSuccess { .. } => TAG_JOIN_CHORD_SUCCESS,
            ChordPayload::JoinChordFail => TAG_JOIN_CHORD_FAIL,
            ChordPayload::Notify => TAG_NOTIFY,
            ChordPayload::StabilizeReq => TAG_STABILIZE_REQ,
            ChordPayload::StabilizeResp { .. } => TAG_STABILIZE_RESP,
            ChordPayload::Ringstate { .. } => TAG_RINGSTATE,
            ChordPayload::LeaveSuccessor { .. } => TAG_LEAVE_SUCCESSOR,
            ChordPayload::LeavePredecessor { .. } => TAG_LEAVE_PREDECESSOR,
            ChordPayload::FindFinger { .. } => TAG_FIND_FINGER,
            ChordPayload::FindFingerSuccess { .. } => TAG_FIND_FINGER_SUCCESS,
            ChordPayload::Lookup { .. } => TAG_LOOKUP,
            ChordPayload::LookupSuccess { .. } => TAG_LOOKUP_SUCCESS,
        }
    }

    /// Exact encoded length in bytes.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + match &self.payload {
                ChordPayload::PingReq { msg } | ChordPayload::PingRsp { msg } => string_size(msg),
                ChordPayload::JoinChord
                | ChordPayload::JoinChordFail
                | ChordPayload::Notify
                | ChordPayload::StabilizeReq => 0,
                ChordPayload::FindSuccessor { .. } => 4 + 20,
                ChordPayload::JoinChordSuccess { .. }
                | ChordPayload::StabilizeResp { .. }
                | ChordPayload::Ringstate { .. }
                | ChordPayload::LeaveSuccessor { .. }
                | ChordPayload::LeavePredecessor { .. } => 4,
                ChordPayload::FindFinger { .. } => 4 + 20 + 2,
                ChordPayload::FindFingerSuccess { .. } => 4 + 2,
                ChordPayload::Lookup { key, .. } => 2 + 4 + 20 + string_size(key),
                ChordPayload::LookupSuccess { key, .. } => 2 + 4 + string_size(key),
            }
    }

    /// Serialize to a fresh datagram buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.put_u8(self.tag());
        buf.put_u32(self.txn);
        match &self.payload {
            ChordPayload::PingReq { msg } | ChordPayload::PingRsp { msg } => {
                put_string(&mut buf, msg);
            }
            ChordPayload::JoinChord
            | ChordPayload::JoinChordFail
            | ChordPayload::Notify
            | ChordPayload::StabilizeReq => {}
            ChordPayload::FindSuccessor { dest, target } => {
                put_addr(&mut buf, *dest);
                put_digest(&mut buf, target);
            }
            ChordPayload::JoinChordSuccess { successor } => put_addr(&mut buf, *successor),
            ChordPayload::StabilizeResp { predecessor } => put_addr(&mut buf, *predecessor),
            ChordPayload::Ringstate { initiator } => put_addr(&mut buf, *initiator),
            ChordPayload::LeaveSuccessor { predecessor } => put_addr(&mut buf, *predecessor),
            ChordPayload::LeavePredecessor { successor } => put_addr(&mut buf, *successor),
            ChordPayload::FindFinger {
                dest,
                target,
                index,
            } => {
                put_addr(&mut buf, *dest);
                put_digest(&mut buf, target);
                buf.put_u16(*index);
            }
            ChordPayload::FindFingerSuccess { finger, index } => {
                put_addr(&mut buf, *finger);
                buf.put_u16(*index);
            }
            ChordPayload::Lookup {
                flag,
                initiator,
                target,
                key,
            } => {
                buf.put_u16(*flag);
                put_addr(&mut buf, *initiator);
                put_digest(&mut buf, target);
                put_string(&mut buf, key);
            }
            ChordPayload::LookupSuccess {
                flag,
                responsible,
                key,
            } => {
                buf.put_u16(*flag);
                put_addr(&mut buf, *responsible);
                put_string(&mut buf, key);
            }
        }
        buf
    }

    /// Decode one datagram. The whole buffer must be consumed.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let buf = &mut buf;
        let tag = get_u8(buf)?;
        let txn = get_u32(buf)?;
        let payload = match tag {
            TAG_PING_REQ => ChordPayload::PingReq {
                msg: get_string(buf)?,
            },
            TAG_PING_RSP => ChordPayload::PingRsp {
                msg: get_string(buf)?,
            },
            TAG_JOIN_CHORD => ChordPayload::JoinChord,
            TAG_FIND_SUCCESSOR => ChordPayload::FindSuccessor {
                dest: get_addr(buf)?,
                target: get_digest(buf)?,
            },
            TAG_JOIN_CHORD_SUCCESS => ChordPayload::JoinChordSuccess {
                successor: get_addr(buf)?,
            },
            TAG_JOIN_CHORD_FAIL => ChordPayload::JoinChordFail,
            TAG_NOTIFY => ChordPayload::Notify,
            TAG_STABILIZE_REQ => ChordPayload::StabilizeReq,
            TAG_STABILIZE_RESP => ChordPayload::StabilizeResp {
                predecessor: get_addr(buf)?,
            },
            TAG_RINGSTATE => ChordPayload::Ringstate {
                initiator: get_addr(buf)?,
            },
            TAG_LEAVE_SUCCESSOR => ChordPayload::LeaveSuccessor {
                predecessor: get_addr(buf)?,
            },
            TAG_LEAVE_PREDECESSOR => ChordPayload::LeavePredecessor {
                successor: get_addr(buf)?,
            },
            TAG_FIND_FINGER => ChordPayload::FindFinger {
                dest: get_addr(buf)?,
                target: get_digest(buf)?,
                index: get_u16(buf)?,
            },
            TAG_FIND_FINGER_SUCCESS => ChordPayload::FindFingerSuccess {
                finger: get_addr(buf)?,
                index: get_u16(buf)?,
            },
            TAG_LOOKUP => ChordPayload::Lookup {
                flag: get_u16(buf)?,
                initiator: get_addr(buf)?,
                target: get_digest(buf)?,
                key: get_string(buf)?,
            },
            TAG_LOOKUP_SUCCESS => ChordPayload::LookupSuccess {
                flag: get_u16(buf)?,
                responsible: get_addr(buf)?,
                key: get_string(buf)?,
            },
            tag => return Err(WireError::UnknownTag { tag }),
        };
        expect_consumed(buf)?;
        Ok(ChordMessage { txn, payload })
    }
}
