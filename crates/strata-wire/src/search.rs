//! Inverted-index transfer frames for the search layer.
//!
//! ## Wire format
//!
//! ```text
//! SearchMessage {
//!     tag: u8,   // message type (1..=5)
//!     txn: u32,  // transaction id
//!     payload: ...
//! }
//! ```
//!
//! These frames travel point-to-point between search layers once the Chord
//! lookup has located the responsible node; they never route recursively
//! themselves.

use std::net::Ipv4Addr;

use bytes::BufMut;

use crate::util::{
    expect_consumed, get_addr, get_string, get_string_vec, get_u32, get_u8, put_addr, put_string,
    put_string_vec, string_size, string_vec_size,
};
use crate::{Result, WireError};

/// Message type for a posting-list store (1).
pub const TAG_STORE: u8 = 1;
/// Message type for the first hop of a search (2).
pub const TAG_SEARCH_INITIAL: u8 = 2;
/// Message type for an intersection step (3).
pub const TAG_SEARCH_STEP: u8 = 3;
/// Message type for the final result report (4).
pub const TAG_SEARCH_COMPLETE: u8 = 4;
/// Message type for bulk key handoff (5).
pub const TAG_PASS_KEYS: u8 = 5;

/// Header size: tag + transaction id.
const HEADER_SIZE: usize = 1 + 4;

/// A search-layer frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchMessage {
    /// Transaction id of the operation this frame belongs to.
    pub txn: u32,
    /// Tag-discriminated payload.
    pub payload: SearchPayload,
}

/// Payloads for [`SearchMessage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchPayload {
    /// Store a published posting list on the responsible node.
    Store {
        /// The inverted-index term.
        key: String,
        /// Document ids to merge into the term's posting list.
        docs: Vec<String>,
    },
    /// First hop of a multi-term search, sent to the node responsible for
    /// the first term.
    SearchInitial {
        /// Node awaiting the final result.
        initiator: Ipv4Addr,
        /// All query terms, first term owned by the receiver.
        terms: Vec<String>,
    },
    /// Intersection step, sent to the node responsible for `terms[0]`.
    SearchStep {
        /// Node awaiting the final result.
        initiator: Ipv4Addr,
        /// Remaining query terms, first owned by the receiver.
        terms: Vec<String>,
        /// Document ids surviving the intersections so far.
        docs: Vec<String>,
    },
    /// Final result, sent directly to the initiator.
    SearchComplete {
        /// Terms not yet intersected when the search finished; empty
        /// unless the posting intersection emptied early.
        terms: Vec<String>,
        /// Document ids matching every intersected term (possibly empty).
        docs: Vec<String>,
    },
    /// Hand a whole posting list to a new owner on join or leave.
    PassKeys {
        /// The inverted-index term.
        key: String,
        /// The term's full posting list.
        docs: Vec<String>,
    },
}

impl SearchMessage {
    /// Message-type tag for this payload.
    pub fn tag(&self) -> u8 {
        match &self.payload {
            SearchPayload::Store { .. } => TAG_STORE,
            SearchPayload::SearchInitial { .. } => TAG_SEARCH_INITIAL,
            SearchPayload::SearchStep { .. } => TAG_SEARCH_STEP,
            SearchPayload::SearchComplete { .. } => TAG_SEARCH_COMPLETE,
            SearchPayload::PassKeys { .. } => TAG_PASS_KEYS,
        }
    }

    /// Exact encoded length in bytes.
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + match &self.payload {
                SearchPayload::Store { key, docs } | SearchPayload::PassKeys { key, docs } => {
                    string_size(key) + string_vec_size(docs)
                }
                SearchPayload::SearchInitial { terms, .. } => 4 + string_vec_size(terms),
                SearchPayload::SearchStep { terms, docs, .. } => {
                    4 + string_vec_size(terms) + string_vec_size(docs)
                }
                SearchPayload::SearchComplete { terms, docs } => {
                    string_vec_size(terms) + string_vec_size(docs)
                }
            }
    }

    /// Serialize to a fresh datagram buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        buf.put_u8(self.tag());
        buf.put_u32(self.txn);
        match &self.payload {
            SearchPayload::Store { key, docs } | SearchPayload::PassKeys { key, docs } => {
                put_string(&mut buf, key);
                put_string_vec(&mut buf, docs);
            }
            SearchPayload::SearchInitial { initiator, terms } => {
                put_addr(&mut buf, *initiator);
                put_string_vec(&mut buf, terms);
            }
            SearchPayload::SearchStep {
                initiator,
                terms,
                docs,
            } => {
                put_addr(&mut buf, *initiator);
                put_string_vec(&mut buf, terms);
                put_string_vec(&mut buf, docs);
            }
            SearchPayload::SearchComplete { terms, docs } => {
                put_string_vec(&mut buf, terms);
                put_string_vec(&mut buf, docs);
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
            TAG_STORE => SearchPayload::Store {
                key: get_string(buf)?,
                docs: get_string_vec(buf)?,
            },
            TAG_SEARCH_INITIAL => SearchPayload::SearchInitial {
                initiator: get_addr(buf)?,
                terms: get_string_vec(buf)?,
            },
            TAG_SEARCH_STEP => SearchPayload::SearchStep {
                initiator: get_addr(buf)?,
                terms: get_string_vec(buf)?,
                docs: get_string_vec(buf)?,
            },
            TAG_SEARCH_COMPLETE => SearchPayload::SearchComplete {
                terms: get_string_vec(buf)?,
                docs: get_string_vec(buf)?,
            },
            TAG_PASS_KEYS => SearchPayload::PassKeys {
                key: get_string(buf)?,
                docs: get_string_vec(buf)?,
            },
            tag => return Err(WireError::UnknownTag { tag }),
        };
        expect_consumed(buf)?;
        Ok(SearchMessage { txn, payload })
    }
}
