//! # strata-types
//!
//! Shared identity and addressing types for the strata overlay:
//!
//! - 160-bit ring identifiers with modular-interval predicates
//! - The static node-number/address directory built by the launcher
//! - The process-wide lookup metrics record
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Ring ID width | 160 bits (SHA-1) |
//! | Ring ID derivation | `SHA-1(dotted-decimal main IPv4 address)` |
//! | Key placement | `SHA-1(key string)` |

pub mod directory;
pub mod metrics;
pub mod ring;

pub use directory::Directory;
pub use metrics::LookupMetrics;
pub use ring::RingId;

/// Node numbers are small integers assigned by the launcher.
pub type NodeNum = u32;

/// Width of the identifier ring in bits. One finger slot per bit.
pub const RING_BITS: u16 = 160;

/// Length of a ring identifier in bytes.
pub const DIGEST_LEN: usize = 20;
