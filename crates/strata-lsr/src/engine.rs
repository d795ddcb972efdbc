//! The link-state engine: neighbor discovery, flooding, forwarding.
//!
//! ## Event model
//!
//! The engine owns no sockets and no timers. The node runtime feeds it
//! events (`on_nd_timer`, `on_message`, `audit_pings`, operator commands)
//! and performs the returned [`LsrAction`]s. Handlers run to completion
//! serially, so every invariant holds again by the time a handler returns:
//! the forwarding table is always the Dijkstra output over the topology
//! database plus the committed neighbor set, and a committed-neighbor
//! change is the only event that makes this node author a fresh LSP.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use strata_types::{Directory, NodeNum};
use strata_wire::lsr::{Lsp, LsrMessage, LsrPayload, Probe};

use crate::dijkstra::shortest_paths;
use crate::{LsrError, Result};

/// Probe text carried by neighbor-discovery frames.
const ND_TEXT: &str = "Neighbor Discovery";

/// Tunables owned by the node configuration.
#[derive(Clone, Copy, Debug)]
pub struct LsrConfig {
    /// Initial TTL for flooded LSPs.
    pub max_ttl: u8,
    /// TTL for single-hop probes.
    pub single_hop: u8,
}

/// One committed or in-progress neighbor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborEntry {
    /// The neighbor's main address.
    pub neighbor_addr: Ipv4Addr,
    /// Local address of the interface the neighbor was heard on.
    pub iface_addr: Ipv4Addr,
}

/// One originator's flooded view of its neighborhood.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyEntry {
    /// Highest LSP sequence number accepted from this originator.
    pub lsp_seq: u64,
    /// Advertised neighbor main addresses, as received.
    pub neighbor_addrs: Vec<Ipv4Addr>,
    /// The same neighbors resolved to node numbers, with unit costs.
    pub edges: Vec<(NodeNum, u32)>,
}

/// One forwarding-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    /// The destination's main address.
    pub dest_addr: Ipv4Addr,
    /// Directly-attached neighbor the path leaves through.
    pub next_hop: NodeNum,
    /// That neighbor's main address.
    pub next_hop_addr: Ipv4Addr,
    /// Local address of the outgoing interface.
    pub iface_addr: Ipv4Addr,
    /// Total path cost.
    pub cost: u32,
}

/// Where a broadcast should go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastScope {
    /// Every attached interface.
    All,
    /// Exactly one interface (by index).
    Only(usize),
    /// Every interface except one: split horizon on the arrival link.
    Except(usize),
}

/// Outbound work produced by a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LsrAction {
    /// Subnet-directed broadcast of `message` on the scoped interfaces.
    Broadcast {
        scope: BroadcastScope,
        message: LsrMessage,
    },
    /// Unicast `message` to `dest` (a directly-reachable next hop).
    Unicast { dest: Ipv4Addr, message: LsrMessage },
    /// A tracked ping was answered.
    PingSuccess { dest: Ipv4Addr, msg: String },
    /// A tracked ping expired or could not be sent.
    PingFailure { dest: Ipv4Addr, msg: String },
    /// Another node pinged us.
    PingReceived { from: Ipv4Addr, msg: String },
}

/// Forwarding decision for an inbound IP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// The packet's source is this node; drop it.
    DropOwnSource,
    /// The destination is a local address; deliver up the stack.
    Deliver,
    /// Forward toward the destination.
    Forward {
        /// Gateway (next-hop main address).
        next_hop: Ipv4Addr,
        /// Local address of the outgoing interface.
        iface_addr: Ipv4Addr,
    },
    /// No forwarding entry; the caller falls back to static routing or drops.
    NoRoute,
}

/// An outstanding tracked ping.
#[derive(Clone, Debug)]
struct PingRequest {
    dest: Ipv4Addr,
    msg: String,
    sent_at: Instant,
}

/// The link-state engine for one node.
pub struct LinkStateEngine {
    node: NodeNum,
    main_addr: Ipv4Addr,
    /// Local address per attached interface; the index is the interface id.
    interfaces: Vec<Ipv4Addr>,
    directory: Directory,
    config: LsrConfig,

    /// Header sequence counter for frames this node authors.
    seq: u32,
    /// Monotonic LSP sequence number, starting at zero.
    lsp_seq: u64,

    /// Neighbors heard in the probing round still in progress.
    current_neighbors: BTreeMap<NodeNum, NeighborEntry>,
    /// Last committed neighbor set.
    stable_neighbors: BTreeMap<NodeNum, NeighborEntry>,
    /// The flooded graph, keyed by originator.
    topology: BTreeMap<NodeNum, TopologyEntry>,
    /// Highest accepted LSP sequence per originator address.
    seen_lsp: BTreeMap<Ipv4Addr, u64>,
    /// Dijkstra output.
    routes: BTreeMap<NodeNum, RouteEntry>,

    ping_tracker: BTreeMap<u32, PingRequest>,
}

impl LinkStateEngine {
    /// Create a detached engine. `initial_seq` seeds the header sequence
    /// counter (the runtime draws it at random so restarts do not collide
    /// with tracked pings from a previous life).
    pub fn new(
        node: NodeNum,
        main_addr: Ipv4Addr,
        interfaces: Vec<Ipv4Addr>,
        directory: Directory,
        config: LsrConfig,
        initial_seq: u32,
    ) -> Self {
        Self {
            node,
            main_addr,
            interfaces,
            directory,
            config,
            seq: initial_seq,
            lsp_seq: 0,
            current_neighbors: BTreeMap::new(),
            stable_neighbors: BTreeMap::new(),
            topology: BTreeMap::new(),
            seen_lsp: BTreeMap::new(),
            routes: BTreeMap::new(),
            ping_tracker: BTreeMap::new(),
        }
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    fn is_own_addr(&self, addr: Ipv4Addr) -> bool {
        addr == self.main_addr || self.interfaces.contains(&addr)
    }

    /// Committed neighbor set.
    pub fn neighbors(&self) -> &BTreeMap<NodeNum, NeighborEntry> {
        &self.stable_neighbors
    }

    /// Current forwarding table.
    pub fn routes(&self) -> &BTreeMap<NodeNum, RouteEntry> {
        &self.routes
    }

    /// Flooded topology database.
    pub fn topology(&self) -> &BTreeMap<NodeNum, TopologyEntry> {
        &self.topology
    }

    // ------------------------------------------------------------------
    // Neighbor discovery
    // ------------------------------------------------------------------

    /// End of a probing round: detect membership or address changes,
    /// commit, flood on change, then start the next round.
    pub fn on_nd_timer(&mut self) -> Vec<LsrAction> {
        let mut actions = Vec::new();
        let changed = self.stable_neighbors != self.current_neighbors;
        self.stable_neighbors = std::mem::take(&mut self.current_neighbors);
        if changed {
            info!(
                node = self.node,
                neighbors = self.stable_neighbors.len(),
                "neighbor set changed, flooding"
            );
            actions.push(self.author_lsp());
            self.recompute_routes();
        }
        actions.push(LsrAction::Broadcast {
            scope: BroadcastScope::All,
            message: LsrMessage {
                seq: self.next_seq(),
                ttl: self.config.single_hop,
                originator: self.main_addr,
                payload: LsrPayload::NdReq(Probe {
                    dest: Ipv4Addr::UNSPECIFIED,
                    msg: ND_TEXT.to_string(),
                }),
            },
        });
        actions
    }

    fn author_lsp(&mut self) -> LsrAction {
        let lsp_seq = self.lsp_seq;
        self.lsp_seq += 1;
        let neighbors: Vec<Ipv4Addr> = self
            .stable_neighbors
            .values()
            .map(|entry| entry.neighbor_addr)
            .collect();
        LsrAction::Broadcast {
            scope: BroadcastScope::All,
            message: LsrMessage {
                seq: self.next_seq(),
                ttl: self.config.max_ttl,
                originator: self.main_addr,
                payload: LsrPayload::Lsp(Lsp {
                    lsp_seq,
                    neighbors,
                    dest: Ipv4Addr::UNSPECIFIED,
                    msg: "LSP".to_string(),
                }),
            },
        }
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Handle one frame received on interface `iface`.
    pub fn on_message(&mut self, iface: usize, message: LsrMessage) -> Vec<LsrAction> {
        if self.is_own_addr(message.originator) {
            return Vec::new();
        }
        match message.payload.clone() {
            LsrPayload::NdReq(_) => self.on_nd_req(iface, &message),
            LsrPayload::NdRsp(probe) => {
                self.on_nd_rsp(iface, message.originator, &probe);
                Vec::new()
            }
            LsrPayload::PingReq(probe) => self.on_ping_req(&message, probe),
            LsrPayload::PingRsp(probe) => self.on_ping_rsp(&message, probe),
            LsrPayload::Lsp(lsp) => self.on_lsp(iface, &message, lsp),
        }
    }

    fn on_nd_req(&mut self, iface: usize, request: &LsrMessage) -> Vec<LsrAction> {
        // Answer with a directed broadcast on the arrival link so the
        // requester learns which of its interfaces faces us.
        vec![LsrAction::Broadcast {
            scope: BroadcastScope::Only(iface),
            message: LsrMessage {
                seq: request.seq,
                ttl: self.config.single_hop,
                originator: self.main_addr,
                payload: LsrPayload::NdRsp(Probe {
                    dest: request.originator,
                    msg: ND_TEXT.to_string(),
                }),
            },
        }]
    }

    fn on_nd_rsp(&mut self, iface: usize, responder: Ipv4Addr, probe: &Probe) {
        if !self.is_own_addr(probe.dest) {
            return;
        }
        let Some(node) = self.directory.reverse(responder) else {
            debug!(%responder, "ND_RSP from address outside the directory");
            return;
        };
        let Some(iface_addr) = self.interfaces.get(iface).copied() else {
            return;
        };
        self.current_neighbors.insert(
            node,
            NeighborEntry {
                neighbor_addr: responder,
                iface_addr,
            },
        );
    }

    // ------------------------------------------------------------------
    // Flooding
    // ------------------------------------------------------------------

    fn on_lsp(&mut self, iface: usize, message: &LsrMessage, lsp: Lsp) -> Vec<LsrAction> {
        let originator = message.originator;
        if let Some(&seen) = self.seen_lsp.get(&originator) {
            if lsp.lsp_seq <= seen {
                debug!(%originator, seq = lsp.lsp_seq, "duplicate LSP dropped");
                return Vec::new();
            }
        }
        self.seen_lsp.insert(originator, lsp.lsp_seq);

        let mut actions = Vec::new();
        // Split horizon: never back out the arrival interface, and keep the
        // original originator on the forwarded copy.
        if message.ttl > 1 {
            actions.push(LsrAction::Broadcast {
                scope: BroadcastScope::Except(iface),
                message: LsrMessage {
                    seq: message.seq,
                    ttl: message.ttl - 1,
                    originator,
                    payload: LsrPayload::Lsp(lsp.clone()),
                },
            });
        }

        if let Some(node) = self.directory.reverse(originator) {
            let edges = lsp
                .neighbors
                .iter()
                .filter_map(|&addr| {
                    let resolved = self.directory.reverse(addr);
                    if resolved.is_none() {
                        debug!(%addr, "LSP lists address outside the directory");
                    }
                    resolved.map(|n| (n, 1))
                })
                .collect();
            self.topology.insert(
                node,
                TopologyEntry {
                    lsp_seq: lsp.lsp_seq,
                    neighbor_addrs: lsp.neighbors,
                    edges,
                },
            );
            self.recompute_routes();
        } else {
            debug!(%originator, "LSP from address outside the directory");
        }
        actions
    }

    // ------------------------------------------------------------------
    // Dijkstra and the forwarding table
    // ------------------------------------------------------------------

    fn recompute_routes(&mut self) {
        let adjacency: BTreeMap<NodeNum, Vec<(NodeNum, u32)>> = self
            .topology
            .iter()
            .map(|(&node, entry)| (node, entry.edges.clone()))
            .collect();
        let paths = shortest_paths(&adjacency, self.stable_neighbors.keys().copied());

        self.routes.clear();
        for (dest, path) in paths {
            if dest == self.node {
                continue;
            }
            let Some(dest_addr) = self.directory.resolve(dest) else {
                continue;
            };
            let Some(next_hop) = self.stable_neighbors.get(&path.next_hop) else {
                continue;
            };
            self.routes.insert(
                dest,
                RouteEntry {
                    dest_addr,
                    next_hop: path.next_hop,
                    next_hop_addr: next_hop.neighbor_addr,
                    iface_addr: next_hop.iface_addr,
                    cost: path.cost,
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // IP-layer hooks
    // ------------------------------------------------------------------

    /// Select a route for a locally-originated packet.
    pub fn route_output(&self, dest: Ipv4Addr) -> Option<RouteEntry> {
        let node = self.directory.reverse(dest)?;
        self.routes.get(&node).copied()
    }

    /// Decide what to do with a packet arriving from the network.
    pub fn route_input(&self, src: Ipv4Addr, dest: Ipv4Addr) -> RouteDecision {
        if self.is_own_addr(src) {
            return RouteDecision::DropOwnSource;
        }
        if self.is_own_addr(dest) {
            return RouteDecision::Deliver;
        }
        match self.route_output(dest) {
            Some(route) => RouteDecision::Forward {
                next_hop: route.next_hop_addr,
                iface_addr: route.iface_addr,
            },
            None => RouteDecision::NoRoute,
        }
    }

    // ------------------------------------------------------------------
    // Routed ping
    // ------------------------------------------------------------------

    /// Operator `PING <node> <msg>`: route a PING_REQ toward the target and
    /// track it until a response or the audit timeout.
    pub fn send_ping(&mut self, node: NodeNum, msg: &str, now: Instant) -> Result<Vec<LsrAction>> {
        let dest = self
            .directory
            .resolve(node)
            .ok_or(LsrError::DirectoryMiss { node })?;
        let Some(route) = self.route_output(dest) else {
            warn!(node, "no route for ping");
            return Ok(vec![LsrAction::PingFailure {
                dest,
                msg: msg.to_string(),
            }]);
        };
        let seq = self.next_seq();
        self.ping_tracker.insert(
            seq,
            PingRequest {
                dest,
                msg: msg.to_string(),
                sent_at: now,
            },
        );
        info!(
            node,
            %dest,
            seq,
            "sending PING_REQ"
        );
        Ok(vec![LsrAction::Unicast {
            dest: route.next_hop_addr,
            message: LsrMessage {
                seq,
                ttl: self.config.max_ttl,
                originator: self.main_addr,
                payload: LsrPayload::PingReq(Probe {
                    dest,
                    msg: msg.to_string(),
                }),
            },
        }])
    }

    fn on_ping_req(&mut self, message: &LsrMessage, probe: Probe) -> Vec<LsrAction> {
        if self.is_own_addr(probe.dest) {
            let from = message.originator;
            let mut actions = vec![LsrAction::PingReceived {
                from,
                msg: probe.msg.clone(),
            }];
            match self.route_output(from) {
                Some(route) => actions.push(LsrAction::Unicast {
                    dest: route.next_hop_addr,
                    message: LsrMessage {
                        seq: message.seq,
                        ttl: self.config.max_ttl,
                        originator: self.main_addr,
                        payload: LsrPayload::PingRsp(Probe {
                            dest: from,
                            msg: probe.msg,
                        }),
                    },
                }),
                None => debug!(%from, "no return route for PING_RSP"),
            }
            return actions;
        }
        self.forward_ping(message, LsrPayload::PingReq(probe))
    }

    fn on_ping_rsp(&mut self, message: &LsrMessage, probe: Probe) -> Vec<LsrAction> {
        if self.is_own_addr(probe.dest) {
            return match self.ping_tracker.remove(&message.seq) {
                Some(request) => vec![LsrAction::PingSuccess {
                    dest: request.dest,
                    msg: probe.msg,
                }],
                None => {
                    debug!(seq = message.seq, "PING_RSP for unknown transaction");
                    Vec::new()
                }
            };
        }
        self.forward_ping(message, LsrPayload::PingRsp(probe))
    }

    /// Forward a transit ping frame one hop along the forwarding table.
    fn forward_ping(&mut self, message: &LsrMessage, payload: LsrPayload) -> Vec<LsrAction> {
        if message.ttl <= 1 {
            debug!("ping TTL expired in transit");
            return Vec::new();
        }
        let dest = match &payload {
            LsrPayload::PingReq(p) | LsrPayload::PingRsp(p) => p.dest,
            _ => return Vec::new(),
        };
        match self.route_output(dest) {
            Some(route) => vec![LsrAction::Unicast {
                dest: route.next_hop_addr,
                message: LsrMessage {
                    seq: message.seq,
                    ttl: message.ttl - 1,
                    originator: message.originator,
                    payload,
                },
            }],
            None => {
                debug!(%dest, "no route to forward ping");
                Vec::new()
            }
        }
    }

    /// Expire tracked pings older than `timeout`.
    pub fn audit_pings(&mut self, now: Instant, timeout: Duration) -> Vec<LsrAction> {
        let expired: Vec<u32> = self
            .ping_tracker
            .iter()
            .filter(|(_, req)| now.duration_since(req.sent_at) >= timeout)
            .map(|(&seq, _)| seq)
            .collect();
        expired
            .into_iter()
            .filter_map(|seq| self.ping_tracker.remove(&seq))
            .map(|req| {
                debug!(%req.dest, "ping expired");
                LsrAction::PingFailure {
                    dest: req.dest,
                    msg: req.msg,
                }
            })
            .collect()
    }
}
