//! Shortest paths over the flooded topology.
//!
//! The graph is directed as advertised: node `u` claims an edge to `v` by
//! listing `v` in its LSP. During convergence the two directions can
//! disagree, so an edge is only relaxed when `v` also advertises `u`. The
//! queue is seeded with the local node's committed neighbors at cost 1;
//! every relaxed node inherits the seed it was first reached through, which
//! becomes its next hop.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use strata_types::NodeNum;

/// Cost and first-hop for one reachable destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathEntry {
    /// Total path cost (uniform edge cost 1).
    pub cost: u32,
    /// The directly-attached neighbor the path leaves through.
    pub next_hop: NodeNum,
}

/// Compute shortest paths from the local node.
///
/// `adjacency` maps each originator to its advertised neighbor list with
/// per-edge costs; `seeds` are the local node's committed neighbors. Ties
/// are broken by insertion order into the queue.
pub fn shortest_paths(
    adjacency: &BTreeMap<NodeNum, Vec<(NodeNum, u32)>>,
    seeds: impl IntoIterator<Item = NodeNum>,
) -> BTreeMap<NodeNum, PathEntry> {
    let mut best: BTreeMap<NodeNum, PathEntry> = BTreeMap::new();
    // (Reverse(cost), insertion order, node) so equal costs pop FIFO.
    let mut queue: BinaryHeap<(Reverse<u32>, Reverse<u64>, NodeNum)> = BinaryHeap::new();
    let mut order: u64 = 0;

    for neighbor in seeds {
        best.insert(
            neighbor,
            PathEntry {
                cost: 1,
                next_hop: neighbor,
            },
        );
        queue.push((Reverse(1), Reverse(order), neighbor));
        order += 1;
    }

    while let Some((Reverse(cost), _, u)) = queue.pop() {
        let Some(entry) = best.get(&u).copied() else {
            continue;
        };
        if cost > entry.cost {
            continue; // stale queue entry
        }
        let Some(edges) = adjacency.get(&u) else {
            continue;
        };
        for &(v, edge_cost) in edges {
            // Undirected confirmation: v must advertise u back.
            let confirmed = adjacency
                .get(&v)
                .is_some_and(|back| back.iter().any(|&(n, _)| n == u));
            if !confirmed {
                continue;
            }
            let new_cost = cost + edge_cost;
            let improves = best.get(&v).is_none_or(|cur| new_cost < cur.cost);
            if improves {
                best.insert(
                    v,
                    PathEntry {
                        cost: new_cost,
                        next_hop: entry.next_hop,
                    },
                );
                queue.push((Reverse(new_cost), Reverse(order), v));
                order += 1;
            }
        }
    }

    best
}
