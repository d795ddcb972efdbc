//! # strata-chord
//!
//! Chord ring maintenance and key lookup for the strata overlay.
//!
//! This crate implements:
//! - Join via a landmark or any ring member, with recursive successor
//!   resolution and direct replies to the original requester
//! - Periodic stabilization and predecessor notification
//! - A 160-slot finger table fixed one slot at a time, with interval reuse
//!   to avoid traffic for slots the previous finger already covers
//! - The key lookup primitive used by the search layer, selected by a
//!   callback flag and counted in a caller-owned metrics record
//! - Voluntary leave with direct pointer repair on both sides
//! - A ring-walk diagnostic and a liveness ping with timeout auditing
//!
//! Like the routing engine, the ring engine is pure: handlers consume one
//! event and return the datagrams, operator reports, and search-layer
//! upcalls to deliver. The caller runs handlers strictly serially.
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Ring width | 160 bits |
//! | Finger slots | 160, slot 1 pinned to the successor |
//! | Outstanding finger queries | 1 per node |
//! | Lookup flags | 0 publish, 1 search-initial, 2 search-step |

pub mod engine;

pub use engine::{
    ChordAction, ChordEngine, ChordStatus, Peer, RingReport, SearchUpcall,
};

/// Error types for operator-facing ring operations.
///
/// Protocol handlers never raise; unexpected frames are logged and dropped.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChordError {
    /// A ring command was issued while this node is detached.
    #[error("not in a ring")]
    NotInRing,

    /// JOIN was issued while this node is already a ring member.
    #[error("already in a ring")]
    AlreadyInRing,

    /// The contacted node refused the join because it is itself detached.
    #[error("join refused: contact node is not in a ring")]
    JoinRefused,

    /// The command referenced a node number the directory does not know.
    #[error("unknown node id {node}")]
    DirectoryMiss { node: u32 },
}

/// Convenience result type for ring operations.
pub type Result<T> = std::result::Result<T, ChordError>;
