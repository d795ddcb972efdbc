//! The search engine: inverted index, publish, intersection search.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use strata_types::ring::in_half_open;
use strata_types::RingId;
use strata_wire::search::{SearchMessage, SearchPayload};

use crate::{FLAG_PUBLISH, FLAG_SEARCH_INITIAL, FLAG_SEARCH_STEP};

/// Outbound work produced by a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchAction {
    /// Unicast `message` to `dest` on the search port.
    Send {
        dest: Ipv4Addr,
        message: SearchMessage,
    },
    /// Ask the ring engine to locate the owner of `key`; the answer comes
    /// back through [`SearchEngine::on_lookup_result`] with the same `txn`.
    Lookup { key: String, flag: u16, txn: u32 },
    /// A search this node initiated finished; print for the operator.
    Result {
        /// The query terms as entered.
        terms: Vec<String>,
        /// Documents matching every term.
        docs: Vec<String>,
    },
}

/// State parked while a ring lookup or a whole search is in flight.
#[derive(Clone, Debug)]
enum PendingOp {
    /// A publish waiting for its term's owner.
    Publish { key: String, docs: Vec<String> },
    /// A search this node initiated, waiting for the first term's owner.
    Seed { terms: Vec<String> },
    /// A search this node initiated, waiting for its final result.
    AwaitResult { terms: Vec<String> },
    /// An intersection step waiting for the next term's owner.
    Step {
        /// Search id stamped on every frame of the chain.
        sid: u32,
        initiator: Ipv4Addr,
        terms: Vec<String>,
        docs: Vec<String>,
    },
}

/// The search layer for one node.
pub struct SearchEngine {
    me: Ipv4Addr,
    me_id: RingId,
    inverted: BTreeMap<String, BTreeSet<String>>,
    pending: HashMap<u32, PendingOp>,
    txn: u32,
}

impl SearchEngine {
    /// Create an empty search layer. `initial_txn` seeds the transaction
    /// counter (drawn at random by the runtime).
    pub fn new(addr: Ipv4Addr, initial_txn: u32) -> Self {
        Self {
            me: addr,
            me_id: RingId::of_addr(addr),
            inverted: BTreeMap::new(),
            pending: HashMap::new(),
            txn: initial_txn,
        }
    }

    fn next_txn(&mut self) -> u32 {
        let txn = self.txn;
        self.txn = self.txn.wrapping_add(1);
        txn
    }

    /// The local slice of the inverted index.
    pub fn index(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.inverted
    }

    /// Drop the state parked under `txn` (the runtime calls this when the
    /// ring refused the lookup, e.g. while detached).
    pub fn abort(&mut self, txn: u32) {
        self.pending.remove(&txn);
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// Publish `doc` under each term: one ring lookup per term, then a
    /// STORE to whoever owns it.
    pub fn publish(&mut self, doc: &str, terms: &[String]) -> Vec<SearchAction> {
        let mut actions = Vec::new();
        for term in terms {
            let txn = self.next_txn();
            self.pending.insert(
                txn,
                PendingOp::Publish {
                    key: term.clone(),
                    docs: vec![doc.to_string()],
                },
            );
            info!(doc, %term, "publishing");
            actions.push(SearchAction::Lookup {
                key: term.clone(),
                flag: FLAG_PUBLISH,
                txn,
            });
        }
        actions
    }

    /// Start a multi-term search.
    pub fn search(&mut self, terms: Vec<String>) -> Vec<SearchAction> {
        let Some(first) = terms.first().cloned() else {
            warn!("SEARCH with no terms");
            return Vec::new();
        };
        let txn = self.next_txn();
        info!(?terms, txn, "search issued");
        self.pending.insert(txn, PendingOp::Seed { terms });
        vec![SearchAction::Lookup {
            key: first,
            flag: FLAG_SEARCH_INITIAL,
            txn,
        }]
    }

    // ------------------------------------------------------------------
    // Ring upcalls
    // ------------------------------------------------------------------

    /// A ring lookup resolved: continue whatever was parked under `txn`.
    pub fn on_lookup_result(
        &mut self,
        flag: u16,
        key: &str,
        responsible: Ipv4Addr,
        txn: u32,
    ) -> Vec<SearchAction> {
        match self.pending.remove(&txn) {
            Some(PendingOp::Publish { key, docs }) => vec![SearchAction::Send {
                dest: responsible,
                message: SearchMessage {
                    txn,
                    payload: SearchPayload::Store { key, docs },
                },
            }],
            Some(PendingOp::Seed { terms }) => {
                // Remember the full query for the final report, then hand
                // the chain to the first term's owner.
                self.pending
                    .insert(txn, PendingOp::AwaitResult { terms: terms.clone() });
                vec![SearchAction::Send {
                    dest: responsible,
                    message: SearchMessage {
                        txn,
                        payload: SearchPayload::SearchInitial {
                            initiator: self.me,
                            terms,
                        },
                    },
                }]
            }
            Some(PendingOp::Step {
                sid,
                initiator,
                terms,
                docs,
            }) => vec![SearchAction::Send {
                dest: responsible,
                message: SearchMessage {
                    txn: sid,
                    payload: SearchPayload::SearchStep {
                        initiator,
                        terms,
                        docs,
                    },
                },
            }],
            Some(op @ PendingOp::AwaitResult { .. }) => {
                // Not a lookup continuation; put it back.
                self.pending.insert(txn, op);
                debug!(flag, key, txn, "lookup result for a completed chain");
                Vec::new()
            }
            None => {
                debug!(flag, key, txn, "lookup result with no pending operation");
                Vec::new()
            }
        }
    }

    /// A new predecessor joined: move every posting list whose term no
    /// longer falls in our arc `(predecessor, self]`.
    pub fn on_join_notify(&mut self, peer: Ipv4Addr) -> Vec<SearchAction> {
        let peer_id = RingId::of_addr(peer);
        let moved: Vec<String> = self
            .inverted
            .keys()
            .filter(|key| !in_half_open(RingId::of_key(key), peer_id, self.me_id))
            .cloned()
            .collect();
        moved
            .into_iter()
            .filter_map(|key| {
                let docs = self.inverted.remove(&key)?;
                info!(%key, to = %peer, "handing key to new predecessor");
                let txn = self.next_txn();
                Some(SearchAction::Send {
                    dest: peer,
                    message: SearchMessage {
                        txn,
                        payload: SearchPayload::PassKeys {
                            key,
                            docs: docs.into_iter().collect(),
                        },
                    },
                })
            })
            .collect()
    }

    /// This node is leaving: push the whole index to the successor.
    pub fn on_leave_notify(&mut self, successor: Ipv4Addr) -> Vec<SearchAction> {
        let index = std::mem::take(&mut self.inverted);
        index
            .into_iter()
            .map(|(key, docs)| {
                info!(%key, to = %successor, "handing key to successor on leave");
                let txn = self.next_txn();
                SearchAction::Send {
                    dest: successor,
                    message: SearchMessage {
                        txn,
                        payload: SearchPayload::PassKeys {
                            key,
                            docs: docs.into_iter().collect(),
                        },
                    },
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Handle one frame; `from` is the datagram source address.
    pub fn on_message(&mut self, from: Ipv4Addr, message: SearchMessage) -> Vec<SearchAction> {
        let sid = message.txn;
        match message.payload {
            SearchPayload::Store { key, docs } | SearchPayload::PassKeys { key, docs } => {
                debug!(%key, count = docs.len(), %from, "merging posting list");
                self.inverted.entry(key).or_default().extend(docs);
                Vec::new()
            }
            SearchPayload::SearchInitial { initiator, terms } => {
                let Some((first, rest)) = terms.split_first() else {
                    debug!(%initiator, "empty search chain");
                    return Vec::new();
                };
                let docs = self.posting(first);
                self.continue_search(sid, initiator, rest.to_vec(), docs)
            }
            SearchPayload::SearchStep {
                initiator,
                terms,
                docs,
            } => {
                let Some((first, rest)) = terms.split_first() else {
                    debug!(%initiator, "empty search chain");
                    return Vec::new();
                };
                let mine = self.posting(first);
                let surviving: Vec<String> =
                    docs.into_iter().filter(|d| mine.contains(d)).collect();
                self.continue_search(sid, initiator, rest.to_vec(), surviving)
            }
            SearchPayload::SearchComplete { terms, docs } => {
                match self.pending.remove(&sid) {
                    Some(PendingOp::AwaitResult { terms: query }) => {
                        info!(?query, hits = docs.len(), "search complete");
                        vec![SearchAction::Result { terms: query, docs }]
                    }
                    Some(other) => {
                        self.pending.insert(sid, other);
                        debug!(?terms, "SEARCH_COMPLETE for an operation still in flight");
                        Vec::new()
                    }
                    None => {
                        debug!(?terms, "SEARCH_COMPLETE with no pending search");
                        Vec::new()
                    }
                }
            }
        }
    }

    fn posting(&self, term: &str) -> Vec<String> {
        self.inverted
            .get(term)
            .map(|docs| docs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Either finish the chain back at the initiator, or park a step and
    /// look up the next term's owner.
    fn continue_search(
        &mut self,
        sid: u32,
        initiator: Ipv4Addr,
        remaining: Vec<String>,
        docs: Vec<String>,
    ) -> Vec<SearchAction> {
        if remaining.is_empty() || docs.is_empty() {
            return vec![SearchAction::Send {
                dest: initiator,
                message: SearchMessage {
                    txn: sid,
                    payload: SearchPayload::SearchComplete {
                        terms: remaining,
                        docs,
                    },
                },
            }];
        }
        let next = remaining[0].clone();
        let txn = self.next_txn();
        self.pending.insert(
            txn,
            PendingOp::Step {
                sid,
                initiator,
                terms: remaining,
                docs,
            },
        );
        vec![SearchAction::Lookup {
            key: next,
            flag: FLAG_SEARCH_STEP,
            txn,
        }]
    }
}
