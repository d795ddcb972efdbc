//! # strata-lsr
//!
//! Link-state intra-domain routing for the strata overlay.
//!
//! This crate implements:
//! - Periodic single-hop neighbor discovery over broadcast links
//! - Link-state packet flooding with per-originator sequence ordering
//!   and split-horizon forwarding
//! - Dijkstra shortest paths over the flooded topology, with undirected
//!   edge confirmation to suppress stale half-edges
//! - The IP-layer route hooks (output route selection and input
//!   forwarding decisions)
//! - A routed ping with timeout auditing
//!
//! The engine is pure: every handler consumes one event (a timer firing or
//! an inbound frame) and returns the datagrams and reports to emit. The
//! caller owns the sockets and timers and runs handlers strictly serially,
//! so no state here needs locking.

pub mod dijkstra;
pub mod engine;

pub use engine::{
    BroadcastScope, LinkStateEngine, LsrAction, LsrConfig, NeighborEntry, RouteDecision,
    RouteEntry, TopologyEntry,
};

/// Error types for operator-facing routing operations.
///
/// Protocol handlers never raise; malformed or unexpected frames are logged
/// and dropped. Only commands entered by the operator surface errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LsrError {
    /// The command referenced a node number the directory does not know.
    #[error("unknown node id {node}")]
    DirectoryMiss { node: u32 },
}

/// Convenience result type for routing operations.
pub type Result<T> = std::result::Result<T, LsrError>;
