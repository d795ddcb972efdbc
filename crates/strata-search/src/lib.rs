//! # strata-search
//!
//! Keyword search over the strata ring.
//!
//! This crate holds the inverted index (term -> set of document ids) and
//! drives the three ring interactions the index needs:
//!
//! - **Publish**: one ring lookup per term locates the responsible node,
//!   then the posting list is pushed there with a STORE frame.
//! - **Search**: the first term's lookup seeds the posting list on its
//!   owner; each further term is located with its own lookup and the
//!   surviving document set is carried along and intersected in place.
//! - **Handoff**: when the ring membership changes, posting lists whose
//!   terms hash outside this node's arc move to their new owner.
//!
//! The engine never talks to the ring directly: it emits
//! [`SearchAction::Lookup`] requests that the runtime feeds to the Chord
//! engine, and consumes the lookup upcalls that come back.

pub mod engine;

pub use engine::{SearchAction, SearchEngine};

/// Lookup flag selecting the publish continuation.
pub const FLAG_PUBLISH: u16 = 0;
/// Lookup flag selecting the search-seed continuation.
pub const FLAG_SEARCH_INITIAL: u16 = 1;
/// Lookup flag selecting the search-step continuation.
pub const FLAG_SEARCH_STEP: u16 = 2;
