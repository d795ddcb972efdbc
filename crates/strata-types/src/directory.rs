//! The static address directory.
//!
//! The launcher assigns every node a small integer number and a main IPv4
//! address, and hands the full mapping to each process at startup. Both
//! engines consult it for reverse lookups in log lines and for resolving
//! operator commands. The mapping never changes after construction.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::NodeNum;

/// One launcher-assigned node entry, as it appears in configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The node's number.
    pub node: NodeNum,
    /// The node's main IPv4 address.
    pub address: Ipv4Addr,
}

/// Immutable node-number/address bimap.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    by_node: BTreeMap<NodeNum, Ipv4Addr>,
    by_addr: BTreeMap<Ipv4Addr, NodeNum>,
}

impl Directory {
    /// Build the directory from launcher entries. Later duplicates win.
    pub fn new(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
        let mut dir = Directory::default();
        for entry in entries {
            dir.by_node.insert(entry.node, entry.address);
            dir.by_addr.insert(entry.address, entry.node);
        }
        dir
    }

    /// Main address of a node number, if known.
    pub fn resolve(&self, node: NodeNum) -> Option<Ipv4Addr> {
        self.by_node.get(&node).copied()
    }

    /// Node number owning a main address, if known.
    pub fn reverse(&self, addr: Ipv4Addr) -> Option<NodeNum> {
        self.by_addr.get(&addr).copied()
    }

    /// Human-readable label for log lines: the node number, or "unknown".
    pub fn label(&self, addr: Ipv4Addr) -> String {
        match self.reverse(addr) {
            Some(node) => node.to_string(),
            None => "unknown".to_string(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    /// Iterate entries in node-number order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeNum, Ipv4Addr)> + '_ {
        self.by_node.iter().map(|(n, a)| (*n, *a))
    }
}
