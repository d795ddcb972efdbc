//! Process-wide lookup metrics.
//!
//! Owned by the node runtime and passed by reference into the Chord engine;
//! there is no hidden global counter. Reported once at shutdown.

/// Counters for ring lookups issued and forwarded by this process.
#[derive(Clone, Copy, Debug, Default)]
pub struct LookupMetrics {
    /// Lookups issued from this node.
    pub queries: u64,
    /// LOOKUP datagrams sent on behalf of any lookup (initial and forwards).
    pub hops: u64,
}

impl LookupMetrics {
    /// Average hops per lookup, or zero before any lookup was issued.
    pub fn average_hops(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.hops as f64 / self.queries as f64
        }
    }
}
