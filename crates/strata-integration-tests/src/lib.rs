//! Deterministic multi-node simulation harness.
//!
//! Runs N complete nodes (routing, ring, and search engines) over an
//! in-memory datagram network. Links are broadcast domains that can be cut
//! mid-test; timers fire only when a test calls the matching `*_round`
//! method, so every scenario is fully deterministic. Every simulated
//! datagram is encoded and decoded through the real wire codec on the way,
//! exactly one message per datagram.

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;

use tracing::debug;

use strata_chord::{ChordAction, ChordEngine, ChordStatus, RingReport, SearchUpcall};
use strata_lsr::{BroadcastScope, LinkStateEngine, LsrAction, LsrConfig};
use strata_search::{SearchAction, SearchEngine};
use strata_types::directory::DirectoryEntry;
use strata_types::ring::in_half_open;
use strata_types::{Directory, LookupMetrics, NodeNum, RingId};
use strata_wire::chord::{ChordMessage, ChordPayload};
use strata_wire::lsr::LsrMessage;
use strata_wire::search::SearchMessage;

/// One simulated node: all three engines plus its metrics record.
pub struct SimNode {
    /// Node number.
    pub num: NodeNum,
    /// Main address (`10.0.0.<num>`).
    pub addr: Ipv4Addr,
    /// Per-interface local addresses, indexed like the engine sees them.
    pub iface_addrs: Vec<Ipv4Addr>,
    /// Link id each interface attaches to.
    pub iface_links: Vec<usize>,
    /// Routing engine.
    pub lsr: LinkStateEngine,
    /// Ring engine.
    pub chord: ChordEngine,
    /// Search layer.
    pub search: SearchEngine,
    /// Process-wide lookup counters for this node.
    pub metrics: LookupMetrics,
}

struct Link {
    attachments: Vec<(NodeNum, usize)>,
    up: bool,
}

enum Frame {
    Lsr {
        to: NodeNum,
        iface: usize,
        message: LsrMessage,
    },
    Chord {
        to: NodeNum,
        from: Ipv4Addr,
        message: ChordMessage,
    },
    Search {
        to: NodeNum,
        from: Ipv4Addr,
        message: SearchMessage,
    },
}

/// The simulated network.
pub struct SimNet {
    /// All nodes by number.
    pub nodes: BTreeMap<NodeNum, SimNode>,
    links: Vec<Link>,
    directory: Directory,

    /// Ring-walk reports observed, in order.
    pub reports: Vec<(NodeNum, RingReport)>,
    /// Search results observed at initiators: (node, terms, docs).
    pub search_results: Vec<(NodeNum, Vec<String>, Vec<String>)>,
    /// Ping outcomes observed, flattened to strings for assertions.
    pub ping_log: Vec<(NodeNum, String)>,
    /// FIND_FINGER datagrams sent since the last counter reset.
    pub find_finger_sent: usize,
}

fn main_addr(num: NodeNum) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, num as u8)
}

impl SimNet {
    /// Build a network of nodes `1..=count` wired by `edges`, one
    /// point-to-point broadcast link per edge. The main address doubles as
    /// the interface address on the node's first link.
    pub fn new(count: NodeNum, edges: &[(NodeNum, NodeNum)]) -> Self {
        let directory = Directory::new((1..=count).map(|n| DirectoryEntry {
            node: n,
            address: main_addr(n),
        }));

        let mut iface_addrs: BTreeMap<NodeNum, Vec<Ipv4Addr>> = BTreeMap::new();
        let mut iface_links: BTreeMap<NodeNum, Vec<usize>> = BTreeMap::new();
        let mut links = Vec::new();
        for (link_id, &(a, b)) in edges.iter().enumerate() {
            let mut attachments = Vec::new();
            for node in [a, b] {
                let addrs = iface_addrs.entry(node).or_default();
                let index = addrs.len();
                addrs.push(Ipv4Addr::new(10, 1 + link_id as u8, 0, node as u8));
                iface_links.entry(node).or_default().push(link_id);
                attachments.push((node, index));
            }
            links.push(Link {
                attachments,
                up: true,
            });
        }

        let nodes = (1..=count)
            .map(|num| {
                let addr = main_addr(num);
                let addrs = iface_addrs.remove(&num).unwrap_or_default();
                let node = SimNode {
                    num,
                    addr,
                    lsr: LinkStateEngine::new(
                        num,
                        addr,
                        addrs.clone(),
                        directory.clone(),
                        LsrConfig {
                            max_ttl: 16,
                            single_hop: 1,
                        },
                        num * 1000,
                    ),
                    chord: ChordEngine::new(num, addr, directory.clone(), num * 1000),
                    search: SearchEngine::new(addr, num * 1000),
                    metrics: LookupMetrics::default(),
                    iface_addrs: addrs,
                    iface_links: iface_links.remove(&num).unwrap_or_default(),
                };
                (num, node)
            })
            .collect();

        SimNet {
            nodes,
            links,
            directory,
            reports: Vec::new(),
            search_results: Vec::new(),
            ping_log: Vec::new(),
            find_finger_sent: 0,
        }
    }

    /// A ring-only network: `count` nodes and no routing links.
    pub fn ring_only(count: NodeNum) -> Self {
        Self::new(count, &[])
    }

    fn node_mut(&mut self, num: NodeNum) -> &mut SimNode {
        self.nodes.get_mut(&num).expect("node exists")
    }

    fn node_by_addr(&self, addr: Ipv4Addr) -> Option<NodeNum> {
        self.directory.reverse(addr)
    }

    /// Cut the link joining `a` and `b`. Frames already queued are gone;
    /// future broadcasts and unicasts simply do not cross.
    pub fn break_link(&mut self, a: NodeNum, b: NodeNum) {
        for link in &mut self.links {
            let touches =
                |n: NodeNum| link.attachments.iter().any(|&(peer, _)| peer == n);
            if touches(a) && touches(b) {
                link.up = false;
            }
        }
    }

    // ------------------------------------------------------------------
    // Timer rounds
    // ------------------------------------------------------------------

    /// Fire every node's neighbor-discovery timer once, delivering all
    /// resulting traffic to quiescence.
    pub fn nd_round(&mut self) {
        let nums: Vec<NodeNum> = self.nodes.keys().copied().collect();
        for num in nums {
            let actions = self.node_mut(num).lsr.on_nd_timer();
            let mut queue = VecDeque::new();
            self.enqueue_lsr(num, actions, &mut queue);
            self.pump(queue);
        }
    }

    /// Fire every node's stabilize timer once.
    pub fn stabilize_round(&mut self) {
        let nums: Vec<NodeNum> = self.nodes.keys().copied().collect();
        for num in nums {
            let actions = self.node_mut(num).chord.on_stabilize_timer();
            let mut queue = VecDeque::new();
            self.enqueue_chord(num, actions, &mut queue);
            self.pump(queue);
        }
    }

    /// Fire every node's fix-finger timer once. Replies arrive
    /// synchronously, so each node finishes its whole table in one round.
    pub fn fix_finger_round(&mut self) {
        let nums: Vec<NodeNum> = self.nodes.keys().copied().collect();
        for num in nums {
            let actions = self.node_mut(num).chord.on_fix_finger_timer();
            let mut queue = VecDeque::new();
            self.enqueue_chord(num, actions, &mut queue);
            self.pump(queue);
        }
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// `JOIN <via>` issued at `node`.
    pub fn join(&mut self, node: NodeNum, via: NodeNum) {
        let actions = self
            .node_mut(node)
            .chord
            .join(via)
            .expect("join accepted");
        let mut queue = VecDeque::new();
        self.enqueue_chord(node, actions, &mut queue);
        self.pump(queue);
    }

    /// `LEAVE` issued at `node`.
    pub fn leave(&mut self, node: NodeNum) {
        let actions = self.node_mut(node).chord.leave().expect("leave accepted");
        let mut queue = VecDeque::new();
        self.enqueue_chord(node, actions, &mut queue);
        self.pump(queue);
    }

    /// `RINGSTATE` issued at `node`; reports land in [`SimNet::reports`].
    pub fn ringstate(&mut self, node: NodeNum) {
        let actions = self
            .node_mut(node)
            .chord
            .ringstate()
            .expect("ringstate accepted");
        let mut queue = VecDeque::new();
        self.enqueue_chord(node, actions, &mut queue);
        self.pump(queue);
    }

    /// `PING <target>` issued at `node`, routed over the forwarding
    /// tables; outcomes land in [`SimNet::ping_log`].
    pub fn ping(&mut self, node: NodeNum, target: NodeNum, msg: &str) {
        let actions = self
            .node_mut(node)
            .lsr
            .send_ping(target, msg, std::time::Instant::now())
            .expect("ping accepted");
        let mut queue = VecDeque::new();
        self.enqueue_lsr(node, actions, &mut queue);
        self.pump(queue);
    }

    /// `PUBLISH` one document under `terms`, issued at `node`.
    pub fn publish(&mut self, node: NodeNum, doc: &str, terms: &[&str]) {
        let terms: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        let actions = self.node_mut(node).search.publish(doc, &terms);
        let mut queue = VecDeque::new();
        self.enqueue_search(node, actions, &mut queue);
        self.pump(queue);
    }

    /// `SEARCH` issued at `node`; results land in [`SimNet::search_results`].
    pub fn search(&mut self, node: NodeNum, terms: &[&str]) {
        let terms: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        let actions = self.node_mut(node).search.search(terms);
        let mut queue = VecDeque::new();
        self.enqueue_search(node, actions, &mut queue);
        self.pump(queue);
    }

    // ------------------------------------------------------------------
    // Inspection helpers
    // ------------------------------------------------------------------

    /// Nodes currently in the ring.
    pub fn ring_members(&self) -> Vec<NodeNum> {
        self.nodes
            .values()
            .filter(|n| n.chord.status() == ChordStatus::InRing)
            .map(|n| n.num)
            .collect()
    }

    /// Ground truth: among current ring members, the successor of `id`.
    pub fn owner_of(&self, id: RingId) -> NodeNum {
        let mut members: Vec<(RingId, NodeNum)> = self
            .nodes
            .values()
            .filter(|n| n.chord.status() == ChordStatus::InRing)
            .map(|n| (n.chord.local().id, n.num))
            .collect();
        members.sort();
        assert!(!members.is_empty(), "owner_of on an empty ring");
        members
            .iter()
            .find(|(member_id, _)| *member_id >= id)
            .or_else(|| members.first())
            .map(|&(_, num)| num)
            .expect("non-empty")
    }

    /// Assert ring integrity: following successor pointers from any member
    /// visits every member exactly once, in increasing id order (mod 2^160),
    /// and returns to the start.
    pub fn assert_ring(&self) {
        let members = self.ring_members();
        let k = members.len();
        assert!(k > 0, "no ring to check");
        for &start in &members {
            let mut visited = Vec::new();
            let mut current = start;
            for _ in 0..k {
                visited.push(current);
                let succ = self.nodes[&current]
                    .chord
                    .successor()
                    .expect("member has successor");
                current = self.node_by_addr(succ.addr).expect("successor resolves");
            }
            assert_eq!(current, start, "walk from {start} does not close");
            let mut sorted = visited.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), k, "walk from {start} misses members");
            // Rotated to the smallest id, the walk must be sorted by id.
            let ids: Vec<RingId> = visited
                .iter()
                .map(|n| self.nodes[n].chord.local().id)
                .collect();
            let min_pos = ids
                .iter()
                .enumerate()
                .min_by_key(|(_, id)| **id)
                .map(|(pos, _)| pos)
                .expect("non-empty");
            let rotated: Vec<RingId> = ids[min_pos..]
                .iter()
                .chain(ids[..min_pos].iter())
                .copied()
                .collect();
            let mut sorted_ids = rotated.clone();
            sorted_ids.sort();
            assert_eq!(rotated, sorted_ids, "ids not monotonic around the ring");
        }
    }

    /// Pending-count helper for tests that meter traffic.
    pub fn reset_counters(&mut self) {
        self.find_finger_sent = 0;
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    fn pump(&mut self, mut queue: VecDeque<Frame>) {
        let mut steps = 0usize;
        while let Some(frame) = queue.pop_front() {
            steps += 1;
            assert!(steps < 100_000, "simulation did not quiesce");
            match frame {
                Frame::Lsr { to, iface, message } => {
                    let bytes = message.encode();
                    let message = LsrMessage::decode(&bytes).expect("lsr codec");
                    let actions = self.node_mut(to).lsr.on_message(iface, message);
                    self.enqueue_lsr(to, actions, &mut queue);
                }
                Frame::Chord { to, from, message } => {
                    let bytes = message.encode();
                    let message = ChordMessage::decode(&bytes).expect("chord codec");
                    let node = self.node_mut(to);
                    let actions = node.chord.on_message(from, message, &mut node.metrics);
                    self.enqueue_chord(to, actions, &mut queue);
                }
                Frame::Search { to, from, message } => {
                    let bytes = message.encode();
                    let message = SearchMessage::decode(&bytes).expect("search codec");
                    let actions = self.node_mut(to).search.on_message(from, message);
                    self.enqueue_search(to, actions, &mut queue);
                }
            }
        }
    }

    fn enqueue_lsr(&mut self, from: NodeNum, actions: Vec<LsrAction>, queue: &mut VecDeque<Frame>) {
        for action in actions {
            match action {
                LsrAction::Broadcast { scope, message } => {
                    let iface_links = self.nodes[&from].iface_links.clone();
                    for (iface, &link_id) in iface_links.iter().enumerate() {
                        let included = match scope {
                            BroadcastScope::All => true,
                            BroadcastScope::Only(only) => iface == only,
                            BroadcastScope::Except(except) => iface != except,
                        };
                        if !included || !self.links[link_id].up {
                            continue;
                        }
                        for &(peer, piface) in &self.links[link_id].attachments {
                            if peer == from && piface == iface {
                                continue;
                            }
                            queue.push_back(Frame::Lsr {
                                to: peer,
                                iface: piface,
                                message: message.clone(),
                            });
                        }
                    }
                }
                LsrAction::Unicast { dest, message } => {
                    let Some(to) = self.node_by_addr(dest) else {
                        debug!(%dest, "unicast to unknown address dropped");
                        continue;
                    };
                    // Receive on an interface sharing an up link with the
                    // sender, if any; the engine ignores it for pings.
                    let iface = self.nodes[&to]
                        .iface_links
                        .iter()
                        .enumerate()
                        .find(|(_, &link_id)| {
                            self.links[link_id].up
                                && self.links[link_id]
                                    .attachments
                                    .iter()
                                    .any(|&(peer, _)| peer == from)
                        })
                        .map(|(iface, _)| iface);
                    match iface {
                        Some(iface) => queue.push_back(Frame::Lsr {
                            to,
                            iface,
                            message,
                        }),
                        None => debug!(%dest, "no surviving link for unicast"),
                    }
                }
                LsrAction::PingSuccess { dest, msg } => {
                    self.ping_log.push((from, format!("success {dest} {msg}")));
                }
                LsrAction::PingFailure { dest, msg } => {
                    self.ping_log.push((from, format!("failure {dest} {msg}")));
                }
                LsrAction::PingReceived { from: peer, msg } => {
                    self.ping_log.push((from, format!("received {peer} {msg}")));
                }
            }
        }
    }

    fn enqueue_chord(
        &mut self,
        from: NodeNum,
        actions: Vec<ChordAction>,
        queue: &mut VecDeque<Frame>,
    ) {
        let from_addr = self.nodes[&from].addr;
        for action in actions {
            match action {
                ChordAction::Send { dest, message } => {
                    if matches!(message.payload, ChordPayload::FindFinger { .. }) {
                        self.find_finger_sent += 1;
                    }
                    let Some(to) = self.node_by_addr(dest) else {
                        debug!(%dest, "ring frame to unknown address dropped");
                        continue;
                    };
                    queue.push_back(Frame::Chord {
                        to,
                        from: from_addr,
                        message,
                    });
                }
                ChordAction::Upcall(upcall) => {
                    let node = self.node_mut(from);
                    let actions = match upcall {
                        SearchUpcall::LookupResult {
                            flag,
                            key,
                            responsible,
                            txn,
                        } => node.search.on_lookup_result(flag, &key, responsible, txn),
                        SearchUpcall::JoinNotify { peer, .. } => node.search.on_join_notify(peer),
                        SearchUpcall::LeaveNotify { successor, .. } => {
                            node.search.on_leave_notify(successor)
                        }
                    };
                    self.enqueue_search(from, actions, queue);
                }
                ChordAction::Report(report) => self.reports.push((from, report)),
                ChordAction::PingSuccess { dest, msg } => {
                    self.ping_log.push((from, format!("success {dest} {msg}")));
                }
                ChordAction::PingFailure { dest, msg } => {
                    self.ping_log.push((from, format!("failure {dest} {msg}")));
                }
                ChordAction::PingReceived { from: peer, msg } => {
                    self.ping_log.push((from, format!("received {peer} {msg}")));
                }
            }
        }
    }

    fn enqueue_search(
        &mut self,
        from: NodeNum,
        actions: Vec<SearchAction>,
        queue: &mut VecDeque<Frame>,
    ) {
        let from_addr = self.nodes[&from].addr;
        for action in actions {
            match action {
                SearchAction::Send { dest, message } => {
                    let Some(to) = self.node_by_addr(dest) else {
                        debug!(%dest, "search frame to unknown address dropped");
                        continue;
                    };
                    queue.push_back(Frame::Search {
                        to,
                        from: from_addr,
                        message,
                    });
                }
                SearchAction::Lookup { key, flag, txn } => {
                    let node = self.node_mut(from);
                    match node.chord.lookup(&key, flag, txn, &mut node.metrics) {
                        Ok(actions) => self.enqueue_chord(from, actions, queue),
                        Err(e) => {
                            debug!(%e, %key, "lookup refused");
                            self.node_mut(from).search.abort(txn);
                        }
                    }
                }
                SearchAction::Result { terms, docs } => {
                    self.search_results.push((from, terms, docs));
                }
            }
        }
    }
}

/// Convenience: assert that `in_half_open` says `owner` covers `id` given
/// its predecessor. Used by lookup-correctness scenarios.
pub fn covers(owner_id: RingId, predecessor_id: RingId, id: RingId) -> bool {
    in_half_open(id, predecessor_id, owner_id)
}
