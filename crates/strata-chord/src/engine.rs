//! The ring engine: membership, stabilization, fingers, lookup.
//!
//! ## Event model
//!
//! Mirrors the routing engine: no sockets, no timers. The runtime feeds
//! events in and performs the returned [`ChordAction`]s: datagrams to
//! send, operator reports to print, and upcalls into the search layer.
//! The lookup counters live in a [`LookupMetrics`] record owned by the
//! runtime and passed in by reference.
//!
//! Replies in the recursive protocols (join, finger, lookup) are sent
//! directly to the original requester, not back along the query path; the
//! requester's address rides inside the query payload for that purpose.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use strata_types::ring::{in_half_open, in_open_interval};
use strata_types::{Directory, LookupMetrics, NodeNum, RingId, RING_BITS};
use strata_wire::chord::{ChordMessage, ChordPayload};

use crate::{ChordError, Result};

/// Ring membership state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChordStatus {
    /// Not part of any ring.
    Detached,
    /// Member of a ring (possibly alone on it).
    InRing,
}

/// An address with its cached ring id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Peer {
    /// Main address.
    pub addr: Ipv4Addr,
    /// SHA-1 of the dotted-decimal address text.
    pub id: RingId,
}

impl Peer {
    /// Build a peer, hashing its address.
    pub fn new(addr: Ipv4Addr) -> Self {
        Peer {
            addr,
            id: RingId::of_addr(addr),
        }
    }
}

/// One node's `{self, predecessor, successor}` triple for a ring walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingReport {
    /// The reporting node.
    pub local: Peer,
    /// Its successor, if any.
    pub successor: Option<Peer>,
    /// Its predecessor, if any.
    pub predecessor: Option<Peer>,
}

/// Upcalls delivered to the search layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchUpcall {
    /// A lookup resolved; `flag` selects the registered continuation.
    LookupResult {
        /// 0 publish, 1 search-initial, 2 search-step.
        flag: u16,
        /// The key that was looked up.
        key: String,
        /// The node responsible for the key.
        responsible: Ipv4Addr,
        /// Transaction id of the original lookup.
        txn: u32,
    },
    /// A new predecessor was adopted; keys it now owns should move there.
    JoinNotify {
        /// The new predecessor.
        peer: Ipv4Addr,
        /// Transaction id of the notify.
        txn: u32,
    },
    /// This node is leaving; the whole index moves to the successor.
    LeaveNotify {
        /// Handoff target.
        successor: Ipv4Addr,
        /// Transaction id of the leave.
        txn: u32,
    },
}

/// Outbound work produced by a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChordAction {
    /// Unicast `message` to `dest` on the application port.
    Send { dest: Ipv4Addr, message: ChordMessage },
    /// Deliver an upcall to the search layer.
    Upcall(SearchUpcall),
    /// Print a ring-walk report for the operator.
    Report(RingReport),
    /// A tracked ping was answered.
    PingSuccess { dest: Ipv4Addr, msg: String },
    /// A tracked ping expired.
    PingFailure { dest: Ipv4Addr, msg: String },
    /// Another node pinged us.
    PingReceived { from: Ipv4Addr, msg: String },
}

/// An outstanding tracked ping.
#[derive(Clone, Debug)]
struct PingRequest {
    dest: Ipv4Addr,
    msg: String,
    sent_at: Instant,
}

/// The ring engine for one node.
pub struct ChordEngine {
    node: NodeNum,
    me: Peer,
    directory: Directory,

    status: ChordStatus,
    successor: Option<Peer>,
    predecessor: Option<Peer>,
    /// Finger table; slot 1 is pinned to the successor.
    fingers: BTreeMap<u16, Ipv4Addr>,
    /// Slot of the one finger query in flight, if any.
    fixing: Option<u16>,

    ping_tracker: BTreeMap<u32, PingRequest>,
    txn: u32,
}

impl ChordEngine {
    /// Create a detached engine. `initial_txn` seeds the transaction
    /// counter (drawn at random by the runtime).
    pub fn new(node: NodeNum, addr: Ipv4Addr, directory: Directory, initial_txn: u32) -> Self {
        Self {
            node,
            me: Peer::new(addr),
            directory,
            status: ChordStatus::Detached,
            successor: None,
            predecessor: None,
            fingers: BTreeMap::new(),
            fixing: None,
            ping_tracker: BTreeMap::new(),
            txn: initial_txn,
        }
    }

    fn next_txn(&mut self) -> u32 {
        let txn = self.txn;
        self.txn = self.txn.wrapping_add(1);
        txn
    }

    /// Current membership state.
    pub fn status(&self) -> ChordStatus {
        self.status
    }

    /// This node's address and ring id.
    pub fn local(&self) -> Peer {
        self.me
    }

    /// Current successor, if in a ring.
    pub fn successor(&self) -> Option<Peer> {
        self.successor
    }

    /// Current predecessor, if known.
    pub fn predecessor(&self) -> Option<Peer> {
        self.predecessor
    }

    /// The finger table (slot -> address).
    pub fn fingers(&self) -> &BTreeMap<u16, Ipv4Addr> {
        &self.fingers
    }

    /// `{self, pred, succ}` for operator output.
    pub fn report(&self) -> RingReport {
        RingReport {
            local: self.me,
            successor: self.successor,
            predecessor: self.predecessor,
        }
    }

    fn set_successor(&mut self, addr: Ipv4Addr) {
        let peer = Peer::new(addr);
        self.successor = Some(peer);
        // Invariant: fingers[1] always equals the successor.
        self.fingers.insert(1, addr);
    }

    fn reset(&mut self) {
        self.status = ChordStatus::Detached;
        self.successor = None;
        self.predecessor = None;
        self.fingers.clear();
        self.fixing = None;
    }

    fn send(&self, dest: Ipv4Addr, txn: u32, payload: ChordPayload) -> ChordAction {
        ChordAction::Send {
            dest,
            message: ChordMessage { txn, payload },
        }
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// `JOIN <node>`: become the landmark when targeting ourselves,
    /// otherwise ask the target to admit us.
    pub fn join(&mut self, node: NodeNum) -> Result<Vec<ChordAction>> {
        if self.status == ChordStatus::InRing {
            return Err(ChordError::AlreadyInRing);
        }
        let target = self
            .directory
            .resolve(node)
            .ok_or(ChordError::DirectoryMiss { node })?;
        if target == self.me.addr {
            self.status = ChordStatus::InRing;
            self.set_successor(self.me.addr);
            self.predecessor = None;
            info!(node = self.node, id = %self.me.id, "ring created, landmark node");
            return Ok(Vec::new());
        }
        let txn = self.next_txn();
        Ok(vec![self.send(target, txn, ChordPayload::JoinChord)])
    }

    /// `LEAVE`: repair both neighbors directly, hand the index off, reset.
    pub fn leave(&mut self) -> Result<Vec<ChordAction>> {
        if self.status == ChordStatus::Detached {
            return Err(ChordError::NotInRing);
        }
        let Some(successor) = self.successor else {
            self.reset();
            return Ok(Vec::new());
        };
        if successor.addr == self.me.addr {
            self.reset();
            return Ok(Vec::new());
        }
        let mut actions = Vec::new();
        // The successor's new predecessor; in a two-node ring there is none.
        let handoff_pred = match self.predecessor {
            Some(pred) if pred.addr != successor.addr => pred.addr,
            _ => Ipv4Addr::UNSPECIFIED,
        };
        let txn = self.next_txn();
        actions.push(self.send(
            successor.addr,
            txn,
            ChordPayload::LeaveSuccessor {
                predecessor: handoff_pred,
            },
        ));
        actions.push(ChordAction::Upcall(SearchUpcall::LeaveNotify {
            successor: successor.addr,
            txn,
        }));
        if let Some(pred) = self.predecessor {
            let txn = self.next_txn();
            actions.push(self.send(
                pred.addr,
                txn,
                ChordPayload::LeavePredecessor {
                    successor: successor.addr,
                },
            ));
        }
        info!(node = self.node, "leaving ring");
        self.reset();
        Ok(actions)
    }

    /// `RINGSTATE`: print our own triple and start the walk.
    pub fn ringstate(&mut self) -> Result<Vec<ChordAction>> {
        if self.status == ChordStatus::Detached {
            return Err(ChordError::NotInRing);
        }
        let Some(successor) = self.successor else {
            return Err(ChordError::NotInRing);
        };
        let txn = self.next_txn();
        Ok(vec![
            ChordAction::Report(self.report()),
            self.send(
                successor.addr,
                txn,
                ChordPayload::Ringstate {
                    initiator: self.me.addr,
                },
            ),
        ])
    }

    /// `PING CHORD <node> <msg>`: liveness probe on the application port.
    pub fn send_ping(&mut self, node: NodeNum, msg: &str, now: Instant) -> Result<Vec<ChordAction>> {
        let dest = self
            .directory
            .resolve(node)
            .ok_or(ChordError::DirectoryMiss { node })?;
        let txn = self.next_txn();
        self.ping_tracker.insert(
            txn,
            PingRequest {
                dest,
                msg: msg.to_string(),
                sent_at: now,
            },
        );
        info!(node, %dest, txn, "sending PING_REQ");
        Ok(vec![self.send(
            dest,
            txn,
            ChordPayload::PingReq {
                msg: msg.to_string(),
            },
        )])
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Locate the node responsible for `key` on behalf of the search
    /// layer. `flag` selects the continuation invoked with the answer and
    /// `txn` identifies the operation in that layer.
    pub fn lookup(
        &mut self,
        key: &str,
        flag: u16,
        txn: u32,
        metrics: &mut LookupMetrics,
    ) -> Result<Vec<ChordAction>> {
        if self.status == ChordStatus::Detached {
            return Err(ChordError::NotInRing);
        }
        let Some(successor) = self.successor else {
            return Err(ChordError::NotInRing);
        };
        let target = RingId::of_key(key);
        metrics.queries += 1;
        info!(issuer = %self.me.id, %target, key, "lookup issued");
        if in_half_open(target, self.me.id, successor.id) {
            return Ok(vec![ChordAction::Upcall(SearchUpcall::LookupResult {
                flag,
                key: key.to_string(),
                responsible: successor.addr,
                txn,
            })]);
        }
        metrics.hops += 1;
        let next = self.closest_preceding_finger(target);
        Ok(vec![self.send(
            next,
            txn,
            ChordPayload::Lookup {
                flag,
                initiator: self.me.addr,
                target,
                key: key.to_string(),
            },
        )])
    }

    /// Highest finger strictly between us and `target`, else the successor.
    fn closest_preceding_finger(&self, target: RingId) -> Ipv4Addr {
        for slot in (1..=RING_BITS).rev() {
            let Some(&finger) = self.fingers.get(&slot) else {
                continue;
            };
            if finger == self.me.addr {
                continue;
            }
            if in_open_interval(RingId::of_addr(finger), self.me.id, target) {
                return finger;
            }
        }
        self.successor.map_or(self.me.addr, |succ| succ.addr)
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Stabilize round: ask the successor for its predecessor.
    pub fn on_stabilize_timer(&mut self) -> Vec<ChordAction> {
        let Some(successor) = self.successor else {
            return Vec::new();
        };
        if self.status == ChordStatus::Detached || successor.addr == self.me.addr {
            return Vec::new();
        }
        let txn = self.next_txn();
        vec![self.send(successor.addr, txn, ChordPayload::StabilizeReq)]
    }

    /// Fix-finger round: pin slot 1, then fix slots in order with at most
    /// one query outstanding.
    pub fn on_fix_finger_timer(&mut self) -> Vec<ChordAction> {
        let Some(successor) = self.successor else {
            return Vec::new();
        };
        if self.status == ChordStatus::Detached || successor.addr == self.me.addr {
            return Vec::new();
        }
        self.fingers.insert(1, successor.addr);
        self.fixing = None;
        self.continue_fix(2)
    }

    /// Fix slots from `start` upward. A slot whose target the previous
    /// finger already covers is reused without traffic; the first slot
    /// that needs the network suspends fixing until its reply arrives.
    fn continue_fix(&mut self, start: u16) -> Vec<ChordAction> {
        let mut slot = start;
        while slot <= RING_BITS {
            let Some(&prev) = self.fingers.get(&(slot - 1)) else {
                return Vec::new();
            };
            let target = self.me.id.finger_target(slot);
            let prev_target = self.me.id.finger_target(slot - 1);
            let prev_id = RingId::of_addr(prev);
            if in_half_open(target, prev_target, prev_id) {
                self.fingers.insert(slot, prev);
                slot += 1;
                continue;
            }
            let txn = self.next_txn();
            self.fixing = Some(slot);
            return vec![self.send(
                prev,
                txn,
                ChordPayload::FindFinger {
                    dest: self.me.addr,
                    target,
                    index: slot,
                },
            )];
        }
        self.fixing = None;
        Vec::new()
    }

    /// Expire tracked pings older than `timeout`.
    pub fn audit_pings(&mut self, now: Instant, timeout: Duration) -> Vec<ChordAction> {
        let expired: Vec<u32> = self
            .ping_tracker
            .iter()
            .filter(|(_, req)| now.duration_since(req.sent_at) >= timeout)
            .map(|(&txn, _)| txn)
            .collect();
        expired
            .into_iter()
            .filter_map(|txn| self.ping_tracker.remove(&txn))
            .map(|req| {
                debug!(%req.dest, "ping expired");
                ChordAction::PingFailure {
                    dest: req.dest,
                    msg: req.msg,
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Handle one frame; `from` is the datagram source address.
    pub fn on_message(
        &mut self,
        from: Ipv4Addr,
        message: ChordMessage,
        metrics: &mut LookupMetrics,
    ) -> Vec<ChordAction> {
        let txn = message.txn;
        match message.payload {
            ChordPayload::PingReq { msg } => vec![
                ChordAction::PingReceived {
                    from,
                    msg: msg.clone(),
                },
                self.send(from, txn, ChordPayload::PingRsp { msg }),
            ],
            ChordPayload::PingRsp { msg } => match self.ping_tracker.remove(&txn) {
                Some(req) => vec![ChordAction::PingSuccess {
                    dest: req.dest,
                    msg,
                }],
                None => {
                    debug!(txn, "PING_RSP for unknown transaction");
                    Vec::new()
                }
            },
            ChordPayload::JoinChord => self.on_join_chord(from, txn),
            ChordPayload::FindSuccessor { dest, target } => self.find_successor(target, dest, txn),
            ChordPayload::JoinChordSuccess { successor } => {
                self.on_join_success(successor, txn)
            }
            ChordPayload::JoinChordFail => {
                error!("{}", ChordError::JoinRefused);
                Vec::new()
            }
            ChordPayload::Notify => self.on_notify(from, txn),
            ChordPayload::StabilizeReq => match self.predecessor {
                Some(pred) => vec![self.send(
                    from,
                    txn,
                    ChordPayload::StabilizeResp {
                        predecessor: pred.addr,
                    },
                )],
                None => Vec::new(),
            },
            ChordPayload::StabilizeResp { predecessor } => {
                self.on_stabilize_resp(predecessor, txn)
            }
            ChordPayload::Ringstate { initiator } => self.on_ringstate(initiator, txn),
            ChordPayload::LeaveSuccessor { predecessor } => {
                if predecessor == Ipv4Addr::UNSPECIFIED {
                    self.predecessor = None;
                } else {
                    self.predecessor = Some(Peer::new(predecessor));
                }
                Vec::new()
            }
            ChordPayload::LeavePredecessor { successor } => {
                self.set_successor(successor);
                Vec::new()
            }
            ChordPayload::FindFinger {
                dest,
                target,
                index,
            } => self.on_find_finger(dest, target, index, txn),
            ChordPayload::FindFingerSuccess { finger, index } => {
                self.on_find_finger_success(finger, index)
            }
            ChordPayload::Lookup {
                flag,
                initiator,
                target,
                key,
            } => self.on_lookup(flag, initiator, target, key, txn, metrics),
            ChordPayload::LookupSuccess {
                flag,
                responsible,
                key,
            } => vec![ChordAction::Upcall(SearchUpcall::LookupResult {
                flag,
                key,
                responsible,
                txn,
            })],
        }
    }

    fn on_join_chord(&mut self, joiner: Ipv4Addr, txn: u32) -> Vec<ChordAction> {
        if self.status == ChordStatus::Detached {
            return vec![self.send(joiner, txn, ChordPayload::JoinChordFail)];
        }
        let joiner_id = RingId::of_addr(joiner);
        info!(issuer = %self.me.id, target = %joiner_id, "join lookup issued");
        if self.successor.map(|s| s.addr) == Some(self.me.addr) {
            // One-node ring: the joiner slots in directly.
            self.set_successor(joiner);
            return vec![
                self.send(
                    joiner,
                    txn,
                    ChordPayload::JoinChordSuccess {
                        successor: self.me.addr,
                    },
                ),
                self.send(joiner, txn, ChordPayload::Notify),
            ];
        }
        self.find_successor(joiner_id, joiner, txn)
    }

    /// The §find-successor rule: answer from our successor when the target
    /// falls in `(self, successor]`, else pass the query closer.
    fn find_successor(&mut self, target: RingId, dest: Ipv4Addr, txn: u32) -> Vec<ChordAction> {
        let Some(successor) = self.successor else {
            debug!("FIND_SUCCESSOR while detached");
            return Vec::new();
        };
        if in_half_open(target, self.me.id, successor.id) {
            info!(responder = %self.me.id, %target, "lookup resolved");
            return vec![self.send(
                dest,
                txn,
                ChordPayload::JoinChordSuccess {
                    successor: successor.addr,
                },
            )];
        }
        let next = self.closest_preceding_finger(target);
        vec![self.send(
            next,
            txn,
            ChordPayload::FindSuccessor { dest, target },
        )]
    }

    fn on_join_success(&mut self, successor: Ipv4Addr, txn: u32) -> Vec<ChordAction> {
        if self.status == ChordStatus::InRing {
            debug!("stale JOIN_CHORD_SUCCESS ignored");
            return Vec::new();
        }
        self.status = ChordStatus::InRing;
        self.set_successor(successor);
        self.predecessor = None;
        info!(node = self.node, %successor, "joined ring");
        vec![self.send(successor, txn, ChordPayload::Notify)]
    }

    fn on_notify(&mut self, candidate: Ipv4Addr, txn: u32) -> Vec<ChordAction> {
        let peer = Peer::new(candidate);
        let adopt = match self.predecessor {
            None => true,
            Some(pred) => in_open_interval(peer.id, pred.id, self.me.id),
        };
        if !adopt {
            return Vec::new();
        }
        self.predecessor = Some(peer);
        info!(node = self.node, predecessor = %candidate, "adopted predecessor");
        vec![ChordAction::Upcall(SearchUpcall::JoinNotify {
            peer: candidate,
            txn,
        })]
    }

    fn on_stabilize_resp(&mut self, candidate: Ipv4Addr, txn: u32) -> Vec<ChordAction> {
        if self.status == ChordStatus::Detached {
            return Vec::new();
        }
        let Some(successor) = self.successor else {
            return Vec::new();
        };
        if candidate != Ipv4Addr::UNSPECIFIED && candidate != self.me.addr {
            let candidate_id = RingId::of_addr(candidate);
            if in_open_interval(candidate_id, self.me.id, successor.id) {
                self.set_successor(candidate);
                info!(node = self.node, successor = %candidate, "adopted successor");
            }
        }
        // Re-announce ourselves to whoever the successor is now.
        let successor = self.successor.map_or(self.me.addr, |s| s.addr);
        vec![self.send(successor, txn, ChordPayload::Notify)]
    }

    fn on_ringstate(&mut self, initiator: Ipv4Addr, txn: u32) -> Vec<ChordAction> {
        if initiator == self.me.addr {
            info!(node = self.node, "ring walk returned to initiator");
            return Vec::new();
        }
        let Some(successor) = self.successor else {
            debug!("RINGSTATE while detached");
            return Vec::new();
        };
        vec![
            ChordAction::Report(self.report()),
            self.send(successor.addr, txn, ChordPayload::Ringstate { initiator }),
        ]
    }

    fn on_find_finger(
        &mut self,
        dest: Ipv4Addr,
        target: RingId,
        index: u16,
        txn: u32,
    ) -> Vec<ChordAction> {
        let Some(successor) = self.successor else {
            debug!("FIND_FINGER while detached");
            return Vec::new();
        };
        if in_half_open(target, self.me.id, successor.id) {
            return vec![self.send(
                dest,
                txn,
                ChordPayload::FindFingerSuccess {
                    finger: successor.addr,
                    index,
                },
            )];
        }
        let next = self.closest_preceding_finger(target);
        vec![self.send(
            next,
            txn,
            ChordPayload::FindFinger {
                dest,
                target,
                index,
            },
        )]
    }

    fn on_find_finger_success(&mut self, finger: Ipv4Addr, index: u16) -> Vec<ChordAction> {
        if self.fixing != Some(index) {
            debug!(index, "FIND_FINGER_SUCCESS with no matching query");
            return Vec::new();
        }
        self.fingers.insert(index, finger);
        self.fixing = None;
        self.continue_fix(index + 1)
    }

    fn on_lookup(
        &mut self,
        flag: u16,
        initiator: Ipv4Addr,
        target: RingId,
        key: String,
        txn: u32,
        metrics: &mut LookupMetrics,
    ) -> Vec<ChordAction> {
        let Some(successor) = self.successor else {
            debug!("LOOKUP while detached");
            return Vec::new();
        };
        if in_half_open(target, self.me.id, successor.id) {
            info!(responder = %self.me.id, %target, %key, "lookup resolved");
            return vec![self.send(
                initiator,
                txn,
                ChordPayload::LookupSuccess {
                    flag,
                    responsible: successor.addr,
                    key,
                },
            )];
        }
        metrics.hops += 1;
        let next = self.closest_preceding_finger(target);
        vec![self.send(
            next,
            txn,
            ChordPayload::Lookup {
                flag,
                initiator,
                target,
                key,
            },
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::directory::DirectoryEntry;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn directory() -> Directory {
        Directory::new((1..=8).map(|i| DirectoryEntry {
            node: u32::from(i),
            address: addr(i),
        }))
    }

    fn engine(node: u8) -> ChordEngine {
        ChordEngine::new(u32::from(node), addr(node), directory(), u32::from(node) * 100)
    }

    fn metrics() -> LookupMetrics {
        LookupMetrics::default()
    }

    /// Deliver every Send in `actions` whose destination is `target`'s
    /// address, returning the actions `target` produced.
    fn deliver(
        actions: &[ChordAction],
        from: Ipv4Addr,
        target: &mut ChordEngine,
        m: &mut LookupMetrics,
    ) -> Vec<ChordAction> {
        let mut out = Vec::new();
        for action in actions {
            if let ChordAction::Send { dest, message } = action {
                if *dest == target.me.addr {
                    out.extend(target.on_message(from, message.clone(), m));
                }
            }
        }
        out
    }

    /// Build a two-node ring (node 1 landmark, node 2 joins through it),
    /// pumping the join handshake to completion.
    fn two_node_ring() -> (ChordEngine, ChordEngine) {
        let mut a = engine(1);
        let mut b = engine(2);
        let mut m = metrics();
        a.join(1).expect("landmark");
        let b_out = b.join(1).expect("join request");
        let a_out = deliver(&b_out, b.me.addr, &mut a, &mut m);
        let b_out = deliver(&a_out, a.me.addr, &mut b, &mut m);
        deliver(&b_out, b.me.addr, &mut a, &mut m);
        (a, b)
    }

    #[test]
    fn test_landmark_join() {
        let mut a = engine(1);
        let actions = a.join(1).expect("landmark");
        assert!(actions.is_empty());
        assert_eq!(a.status(), ChordStatus::InRing);
        assert_eq!(a.successor().map(|s| s.addr), Some(addr(1)));
        assert_eq!(a.predecessor(), None);
    }

    #[test]
    fn test_join_while_in_ring_is_error() {
        let mut a = engine(1);
        a.join(1).expect("landmark");
        assert_eq!(a.join(2), Err(ChordError::AlreadyInRing));
    }

    #[test]
    fn test_join_unknown_node_is_directory_miss() {
        let mut a = engine(1);
        assert_eq!(a.join(99), Err(ChordError::DirectoryMiss { node: 99 }));
    }

    #[test]
    fn test_join_refused_by_detached_contact() {
        let mut a = engine(1);
        let mut b = engine(2);
        let mut m = metrics();
        let b_out = b.join(1).expect("join request");
        let a_out = deliver(&b_out, b.me.addr, &mut a, &mut m);
        assert!(matches!(
            &a_out[0],
            ChordAction::Send {
                message: ChordMessage {
                    payload: ChordPayload::JoinChordFail,
                    ..
                },
                ..
            }
        ));
        // The refusal leaves the joiner detached.
        deliver(&a_out, a.me.addr, &mut b, &mut m);
        assert_eq!(b.status(), ChordStatus::Detached);
    }

    #[test]
    fn test_two_node_ring_pointers() {
        let (a, b) = two_node_ring();
        assert_eq!(a.status(), ChordStatus::InRing);
        assert_eq!(b.status(), ChordStatus::InRing);
        assert_eq!(a.successor().map(|s| s.addr), Some(addr(2)));
        assert_eq!(b.successor().map(|s| s.addr), Some(addr(1)));
        assert_eq!(a.predecessor().map(|p| p.addr), Some(addr(2)));
        // fingers[1] tracks the successor on both sides.
        assert_eq!(a.fingers().get(&1), Some(&addr(2)));
        assert_eq!(b.fingers().get(&1), Some(&addr(1)));
    }

    #[test]
    fn test_notify_duplicate_is_idempotent() {
        let (mut a, b) = two_node_ring();
        let mut m = metrics();
        let before = a.predecessor();
        let actions = a.on_message(
            b.me.addr,
            ChordMessage {
                txn: 9,
                payload: ChordPayload::Notify,
            },
            &mut m,
        );
        assert!(actions.is_empty(), "repeat NOTIFY changes nothing");
        assert_eq!(a.predecessor(), before);
    }

    #[test]
    fn test_stabilize_round_trip() {
        let (mut a, mut b) = two_node_ring();
        let mut m = metrics();
        let a_out = a.on_stabilize_timer();
        assert!(matches!(
            &a_out[0],
            ChordAction::Send {
                message: ChordMessage {
                    payload: ChordPayload::StabilizeReq,
                    ..
                },
                ..
            }
        ));
        let b_out = deliver(&a_out, a.me.addr, &mut b, &mut m);
        // B's predecessor is A, so A learns nothing new and re-notifies.
        let a_out = deliver(&b_out, b.me.addr, &mut a, &mut m);
        assert_eq!(a.successor().map(|s| s.addr), Some(addr(2)));
        assert!(a_out.iter().any(|x| matches!(
            x,
            ChordAction::Send {
                message: ChordMessage {
                    payload: ChordPayload::Notify,
                    ..
                },
                ..
            }
        )));
    }

    #[test]
    fn test_stabilize_adopts_interposed_candidate() {
        // Successor reports a predecessor that sits between us and it; we
        // adopt the candidate and notify it.
        let ids: Vec<(u8, RingId)> = (1..=8).map(|i| (i, RingId::of_addr(addr(i)))).collect();
        // Pick three addresses ordered on the ring: a < c < s clockwise.
        let (a_n, a_id) = ids[0];
        let (c_n, s_n) = {
            let mut between = None;
            'outer: for &(c, c_id) in &ids[1..] {
                for &(s, s_id) in &ids[1..] {
                    if s != c && in_open_interval(c_id, a_id, s_id) {
                        between = Some((c, s));
                        break 'outer;
                    }
                }
            }
            between.expect("some triple is ordered")
        };
        let mut m = metrics();
        let mut e = engine(a_n);
        e.join(u32::from(a_n)).expect("landmark");
        e.set_successor(addr(s_n));
        let actions = e.on_message(
            addr(s_n),
            ChordMessage {
                txn: 1,
                payload: ChordPayload::StabilizeResp {
                    predecessor: addr(c_n),
                },
            },
            &mut m,
        );
        assert_eq!(e.successor().map(|s| s.addr), Some(addr(c_n)));
        // NOTIFY goes to the adopted candidate.
        assert!(matches!(
            &actions[0],
            ChordAction::Send { dest, message: ChordMessage { payload: ChordPayload::Notify, .. } }
                if *dest == addr(c_n)
        ));
    }

    #[test]
    fn test_stabilize_ignores_null_and_self() {
        let (mut a, _b) = two_node_ring();
        let mut m = metrics();
        for candidate in [Ipv4Addr::UNSPECIFIED, addr(1)] {
            let before = a.successor();
            a.on_message(
                addr(2),
                ChordMessage {
                    txn: 1,
                    payload: ChordPayload::StabilizeResp {
                        predecessor: candidate,
                    },
                },
                &mut m,
            );
            assert_eq!(a.successor(), before);
        }
    }

    #[test]
    fn test_fix_finger_single_outstanding_query() {
        let (mut a, _b) = two_node_ring();
        let sends: usize = a
            .on_fix_finger_timer()
            .iter()
            .filter(|x| matches!(x, ChordAction::Send { .. }))
            .count();
        assert!(sends <= 1, "at most one finger query in flight");
        assert_eq!(a.fingers().get(&1), Some(&addr(2)));
    }

    #[test]
    fn test_find_finger_success_resumes_and_duplicates_are_ignored() {
        let (mut a, _b) = two_node_ring();
        let mut m = metrics();
        let actions = a.on_fix_finger_timer();
        let Some((index, txn)) = actions.iter().find_map(|x| match x {
            ChordAction::Send {
                message:
                    ChordMessage {
                        txn,
                        payload: ChordPayload::FindFinger { index, .. },
                    },
                ..
            } => Some((*index, *txn)),
            _ => None,
        }) else {
            // Every slot was reused from the successor; nothing to resume.
            return;
        };
        let reply = ChordMessage {
            txn,
            payload: ChordPayload::FindFingerSuccess {
                finger: addr(2),
                index,
            },
        };
        a.on_message(addr(2), reply.clone(), &mut m);
        assert_eq!(a.fingers().get(&index), Some(&addr(2)));
        let fingers_before = a.fingers().clone();
        let dup = a.on_message(addr(2), reply, &mut m);
        assert!(dup.is_empty(), "duplicate reply changes nothing");
        assert_eq!(a.fingers(), &fingers_before);
    }

    #[test]
    fn test_fingers_point_at_target_successors() {
        let (mut a, mut b) = two_node_ring();
        let mut m = metrics();
        // Pump finger fixing to completion, delivering every datagram to
        // whichever node it addresses (including self-sends).
        let mut pending: std::collections::VecDeque<(Ipv4Addr, Ipv4Addr, ChordMessage)> = a
            .on_fix_finger_timer()
            .into_iter()
            .filter_map(|x| match x {
                ChordAction::Send { dest, message } => Some((a.me.addr, dest, message)),
                _ => None,
            })
            .collect();
        let mut steps = 0;
        while let Some((from, dest, message)) = pending.pop_front() {
            steps += 1;
            assert!(steps < 2000, "finger fixing did not converge");
            let out = if dest == a.me.addr {
                a.on_message(from, message, &mut m)
            } else {
                b.on_message(from, message, &mut m)
            };
            for action in out {
                if let ChordAction::Send { dest: next, message } = action {
                    pending.push_back((dest, next, message));
                }
            }
        }
        // With members a and b, the successor of any target t is b when
        // t lies in (a, b] and a otherwise.
        for (&slot, &finger) in a.fingers() {
            let target = a.me.id.finger_target(slot);
            let expected = if in_half_open(target, a.me.id, b.me.id) {
                b.me.addr
            } else {
                a.me.addr
            };
            assert_eq!(finger, expected, "finger {slot} points at the wrong node");
        }
    }

    #[test]
    fn test_lookup_short_circuit_counts_no_hops() {
        let mut a = engine(1);
        a.join(1).expect("landmark");
        let mut m = metrics();
        let actions = a.lookup("alpha", 0, 7, &mut m).expect("lookup");
        assert_eq!(
            actions,
            vec![ChordAction::Upcall(SearchUpcall::LookupResult {
                flag: 0,
                key: "alpha".to_string(),
                responsible: addr(1),
                txn: 7,
            })]
        );
        assert_eq!(m.queries, 1);
        assert_eq!(m.hops, 0);
    }

    #[test]
    fn test_lookup_while_detached_is_error() {
        let mut a = engine(1);
        let mut m = metrics();
        assert_eq!(a.lookup("k", 0, 1, &mut m), Err(ChordError::NotInRing));
    }

    #[test]
    fn test_lookup_resolves_across_two_nodes() {
        let (mut a, mut b) = two_node_ring();
        let mut m = metrics();
        let key = "alpha";
        let target = RingId::of_key(key);
        let owner_is_a = in_half_open(target, b.me.id, a.me.id);
        // Issue from the node that does not cover the key with its own
        // successor interval, so the lookup takes a hop.
        let (issuer, other) = if owner_is_a { (&mut a, &mut b) } else { (&mut b, &mut a) };
        let out = issuer.lookup(key, 1, 42, &mut m).expect("lookup");
        let issuer_addr = issuer.me.addr;
        let replies = deliver(&out, issuer_addr, other, &mut m);
        let final_up = deliver(&replies, other.me.addr, issuer, &mut m);
        let responsible = issuer_addr_of_result(&final_up).expect("lookup result");
        assert_eq!(responsible, if owner_is_a { addr(1) } else { addr(2) });
        assert_eq!(m.queries, 1);
        assert_eq!(m.hops, 1);
    }

    fn issuer_addr_of_result(actions: &[ChordAction]) -> Option<Ipv4Addr> {
        actions.iter().find_map(|x| match x {
            ChordAction::Upcall(SearchUpcall::LookupResult { responsible, .. }) => {
                Some(*responsible)
            }
            _ => None,
        })
    }

    #[test]
    fn test_leave_two_node_ring_repairs_both_sides() {
        let (mut a, mut b) = two_node_ring();
        let mut m = metrics();
        let actions = a.leave().expect("leave");
        assert_eq!(a.status(), ChordStatus::Detached);
        assert!(a.fingers().is_empty());
        assert!(actions.iter().any(|x| matches!(
            x,
            ChordAction::Upcall(SearchUpcall::LeaveNotify { successor, .. })
                if *successor == addr(2)
        )));
        deliver(&actions, addr(1), &mut b, &mut m);
        // B is alone again: successor itself, no predecessor.
        assert_eq!(b.successor().map(|s| s.addr), Some(addr(2)));
        assert_eq!(b.predecessor(), None);
    }

    #[test]
    fn test_leave_while_detached_is_error() {
        let mut a = engine(1);
        assert_eq!(a.leave(), Err(ChordError::NotInRing));
    }

    #[test]
    fn test_leave_alone_just_detaches() {
        let mut a = engine(1);
        a.join(1).expect("landmark");
        let actions = a.leave().expect("leave");
        assert!(actions.is_empty());
        assert_eq!(a.status(), ChordStatus::Detached);
    }

    #[test]
    fn test_ringstate_walk_terminates_at_initiator() {
        let (mut a, mut b) = two_node_ring();
        let mut m = metrics();
        let a_out = a.ringstate().expect("ringstate");
        assert!(matches!(a_out[0], ChordAction::Report(_)));
        let b_out = deliver(&a_out, addr(1), &mut b, &mut m);
        assert!(matches!(b_out[0], ChordAction::Report(_)));
        let a_final = deliver(&b_out, addr(2), &mut a, &mut m);
        assert!(a_final.is_empty(), "walk stops back at the initiator");
    }

    #[test]
    fn test_chord_ping_round_trip_and_timeout() {
        let (mut a, mut b) = two_node_ring();
        let mut m = metrics();
        let now = Instant::now();
        let out = a.send_ping(2, "hello", now).expect("ping");
        let replies = deliver(&out, addr(1), &mut b, &mut m);
        assert!(replies.iter().any(|x| matches!(
            x,
            ChordAction::PingReceived { from, .. } if *from == addr(1)
        )));
        let final_actions = deliver(&replies, addr(2), &mut a, &mut m);
        assert!(final_actions.iter().any(|x| matches!(
            x,
            ChordAction::PingSuccess { dest, .. } if *dest == addr(2)
        )));
        // A second ping left unanswered expires at audit.
        a.send_ping(2, "late", now).expect("ping");
        let expired = a.audit_pings(now + Duration::from_secs(3), Duration::from_secs(2));
        assert!(matches!(
            &expired[0],
            ChordAction::PingFailure { dest, msg } if *dest == addr(2) && msg == "late"
        ));
    }
}
