//! The serial event loop tying the engines to sockets and timers.
//!
//! One task owns all protocol state. Socket readers and the stdin reader
//! run as separate tasks but only enqueue events; the loop here dequeues
//! them one at a time, runs the owning engine's handler to completion, and
//! performs the returned actions. Timers are plain deadlines re-armed
//! after their handler returns, never during it. Nothing in the engines is
//! shared, so nothing is locked.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncBufReadExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use strata_chord::{ChordAction, ChordEngine, Peer, RingReport, SearchUpcall};
use strata_lsr::{BroadcastScope, LinkStateEngine, LsrAction, LsrConfig};
use strata_search::{SearchAction, SearchEngine};
use strata_types::{Directory, LookupMetrics};
use strata_wire::chord::ChordMessage;
use strata_wire::lsr::LsrMessage;
use strata_wire::search::SearchMessage;

use crate::commands::{self, Command, DumpTable};
use crate::config::{Interface, NodeConfig, ProtocolConfig};

/// Events queued for the serial loop.
pub enum Event {
    /// Datagram on a routing socket.
    Lsr { iface: usize, data: Vec<u8> },
    /// Datagram on the application socket.
    Chord { from: SocketAddr, data: Vec<u8> },
    /// Datagram on the search socket.
    Search { from: SocketAddr, data: Vec<u8> },
    /// One line of operator input.
    Command(String),
    /// Stdin closed or ctrl-c.
    Shutdown,
}

#[derive(Clone, Copy, Debug)]
enum TimerKind {
    Nd,
    LsrAudit,
    Stabilize,
    FixFinger,
    ChordAudit,
}

/// Pending engine output, drained in order.
enum Work {
    Lsr(LsrAction),
    Chord(ChordAction),
    Search(SearchAction),
}

/// One strata node: engines, sockets, timers.
pub struct Node {
    directory: Directory,
    interfaces: Vec<Interface>,
    protocol: ProtocolConfig,

    lsr: LinkStateEngine,
    chord: ChordEngine,
    search: SearchEngine,
    metrics: LookupMetrics,

    ls_sockets: Vec<Arc<UdpSocket>>,
    app_socket: Arc<UdpSocket>,
    search_socket: Arc<UdpSocket>,

    ping_timeout: Duration,
    nd_at: Instant,
    lsr_audit_at: Instant,
    stabilize_at: Instant,
    fix_finger_at: Instant,
    chord_audit_at: Instant,
}

impl Node {
    /// Bind sockets, build engines, and spawn the reader tasks. Returns
    /// the node and the event queue its loop will consume.
    pub async fn new(config: NodeConfig) -> anyhow::Result<(Self, mpsc::Receiver<Event>)> {
        let interfaces = config.interfaces()?;
        let main_addr = config.main_addr()?;
        let directory = Directory::new(config.directory.iter().cloned());
        let protocol = config.protocol.clone();

        let (tx, rx) = mpsc::channel(1024);

        // One routing socket per interface, broadcast enabled.
        let mut ls_sockets = Vec::with_capacity(interfaces.len());
        for (index, iface) in interfaces.iter().enumerate() {
            let socket = UdpSocket::bind((iface.addr, protocol.ls_port)).await?;
            socket.set_broadcast(true)?;
            let socket = Arc::new(socket);
            spawn_reader(socket.clone(), tx.clone(), move |_from, data| Event::Lsr {
                iface: index,
                data,
            });
            ls_sockets.push(socket);
        }

        let app_socket = Arc::new(
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, protocol.app_port)).await?,
        );
        spawn_reader(app_socket.clone(), tx.clone(), |from, data| Event::Chord {
            from,
            data,
        });

        let search_socket = Arc::new(
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, protocol.search_port)).await?,
        );
        spawn_reader(search_socket.clone(), tx.clone(), |from, data| {
            Event::Search { from, data }
        });

        spawn_stdin(tx.clone());
        spawn_ctrl_c(tx);

        let lsr = LinkStateEngine::new(
            config.node.number,
            main_addr,
            interfaces.iter().map(|i| i.addr).collect(),
            directory.clone(),
            LsrConfig {
                max_ttl: protocol.max_ttl,
                single_hop: protocol.single_hop,
            },
            rand::random(),
        );
        let chord = ChordEngine::new(config.node.number, main_addr, directory.clone(), rand::random());
        let search = SearchEngine::new(main_addr, rand::random());

        let now = Instant::now();
        let ping_timeout = Duration::from_millis(protocol.ping_timeout_ms);
        let node = Node {
            nd_at: now + Duration::from_millis(protocol.nd_timeout_ms),
            lsr_audit_at: now + ping_timeout,
            stabilize_at: now + Duration::from_millis(protocol.stabilize_period_ms),
            fix_finger_at: now + Duration::from_millis(protocol.fix_finger_period_ms),
            chord_audit_at: now + ping_timeout,
            ping_timeout,
            directory,
            interfaces,
            protocol,
            lsr,
            chord,
            search,
            metrics: LookupMetrics::default(),
            ls_sockets,
            app_socket,
            search_socket,
        };
        Ok((node, rx))
    }

    /// Run until shutdown, then report the lookup hop average.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<Event>) -> anyhow::Result<()> {
        info!("node event loop running");
        loop {
            let (kind, deadline) = self.next_timer();
            tokio::select! {
                event = rx.recv() => match event {
                    Some(Event::Shutdown) | None => break,
                    Some(event) => self.handle_event(event).await?,
                },
                _ = time::sleep_until(time::Instant::from_std(deadline)) => {
                    self.handle_timer(kind).await?;
                }
            }
        }
        println!(
            "------------------ Average Hop Count = {:.2} ------------------",
            self.metrics.average_hops()
        );
        info!("node stopped");
        Ok(())
    }

    fn next_timer(&self) -> (TimerKind, Instant) {
        let mut next = (TimerKind::Nd, self.nd_at);
        for candidate in [
            (TimerKind::LsrAudit, self.lsr_audit_at),
            (TimerKind::Stabilize, self.stabilize_at),
            (TimerKind::FixFinger, self.fix_finger_at),
            (TimerKind::ChordAudit, self.chord_audit_at),
        ] {
            if candidate.1 < next.1 {
                next = candidate;
            }
        }
        next
    }

    /// Run one timer handler, then re-arm that timer.
    async fn handle_timer(&mut self, kind: TimerKind) -> anyhow::Result<()> {
        let now = Instant::now();
        match kind {
            TimerKind::Nd => {
                let actions = self.lsr.on_nd_timer();
                self.drain(actions.into_iter().map(Work::Lsr).collect()).await?;
                self.nd_at = now + Duration::from_millis(self.protocol.nd_timeout_ms);
            }
            TimerKind::LsrAudit => {
                let actions = self.lsr.audit_pings(now, self.ping_timeout);
                self.drain(actions.into_iter().map(Work::Lsr).collect()).await?;
                self.lsr_audit_at = now + self.ping_timeout;
            }
            TimerKind::Stabilize => {
                let actions = self.chord.on_stabilize_timer();
                self.drain(actions.into_iter().map(Work::Chord).collect()).await?;
                self.stabilize_at = now + Duration::from_millis(self.protocol.stabilize_period_ms);
            }
            TimerKind::FixFinger => {
                let actions = self.chord.on_fix_finger_timer();
                self.drain(actions.into_iter().map(Work::Chord).collect()).await?;
                self.fix_finger_at =
                    now + Duration::from_millis(self.protocol.fix_finger_period_ms);
            }
            TimerKind::ChordAudit => {
                let actions = self.chord.audit_pings(now, self.ping_timeout);
                self.drain(actions.into_iter().map(Work::Chord).collect()).await?;
                self.chord_audit_at = now + self.ping_timeout;
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Event) -> anyhow::Result<()> {
        match event {
            Event::Lsr { iface, data } => match LsrMessage::decode(&data) {
                Ok(message) => {
                    let actions = self.lsr.on_message(iface, message);
                    self.drain(actions.into_iter().map(Work::Lsr).collect()).await?;
                }
                Err(e) => debug!(iface, %e, "malformed routing frame dropped"),
            },
            Event::Chord { from, data } => {
                let SocketAddr::V4(from) = from else {
                    return Ok(());
                };
                match ChordMessage::decode(&data) {
                    Ok(message) => {
                        let actions = self.chord.on_message(*from.ip(), message, &mut self.metrics);
                        self.drain(actions.into_iter().map(Work::Chord).collect()).await?;
                    }
                    Err(e) => debug!(%from, %e, "malformed ring frame dropped"),
                }
            }
            Event::Search { from, data } => {
                let SocketAddr::V4(from) = from else {
                    return Ok(());
                };
                match SearchMessage::decode(&data) {
                    Ok(message) => {
                        let actions = self.search.on_message(*from.ip(), message);
                        self.drain(actions.into_iter().map(Work::Search).collect()).await?;
                    }
                    Err(e) => debug!(%from, %e, "malformed search frame dropped"),
                }
            }
            Event::Command(line) => match commands::parse(&line) {
                Ok(Some(command)) => self.handle_command(command).await?,
                Ok(None) => {}
                Err(usage) => println!("error: {usage}"),
            },
            Event::Shutdown => {}
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Ping { node, msg } => {
                match self.lsr.send_ping(node, &msg, Instant::now()) {
                    Ok(actions) => {
                        self.drain(actions.into_iter().map(Work::Lsr).collect()).await?
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            Command::ChordPing { node, msg } => {
                match self.chord.send_ping(node, &msg, Instant::now()) {
                    Ok(actions) => {
                        self.drain(actions.into_iter().map(Work::Chord).collect()).await?
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            Command::Dump(table) => self.dump(table),
            Command::Join(node) => match self.chord.join(node) {
                Ok(actions) => {
                    self.drain(actions.into_iter().map(Work::Chord).collect()).await?
                }
                Err(e) => println!("error: {e}"),
            },
            Command::Leave => match self.chord.leave() {
                Ok(actions) => {
                    self.drain(actions.into_iter().map(Work::Chord).collect()).await?
                }
                Err(e) => println!("error: {e}"),
            },
            Command::Ringstate => match self.chord.ringstate() {
                Ok(actions) => {
                    self.drain(actions.into_iter().map(Work::Chord).collect()).await?
                }
                Err(e) => println!("error: {e}"),
            },
            Command::Fingers => {
                let local = self.chord.local();
                println!("Finger table of {}", local.id);
                for (&slot, &finger) in self.chord.fingers() {
                    println!(
                        "  {slot:>3}  target {}  node {}",
                        local.id.finger_target(slot),
                        self.directory.label(finger)
                    );
                }
            }
            Command::Publish { path } => match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let mut works = Vec::new();
                    for line in content.lines() {
                        let mut tokens = line.split_whitespace();
                        let Some(doc) = tokens.next() else { continue };
                        let terms: Vec<String> = tokens.map(|t| t.to_string()).collect();
                        works.extend(self.search.publish(doc, &terms).into_iter().map(Work::Search));
                    }
                    self.drain(works).await?;
                }
                Err(e) => println!("error: cannot read {path}: {e}"),
            },
            Command::Search { terms } => {
                let actions = self.search.search(terms);
                self.drain(actions.into_iter().map(Work::Search).collect()).await?;
            }
        }
        Ok(())
    }

    fn dump(&self, table: DumpTable) {
        match table {
            DumpTable::Neighbors => {
                println!("{} neighbors", self.lsr.neighbors().len());
                for (node, entry) in self.lsr.neighbors() {
                    println!("{node}\t\t{}\t\t{}", entry.neighbor_addr, entry.iface_addr);
                }
            }
            DumpTable::Routes => {
                println!("{} routes", self.lsr.routes().len());
                for (dest, route) in self.lsr.routes() {
                    println!(
                        "{dest}\t\t{}\t\t{}\t\t{}\t\t{}\t\t{}",
                        route.dest_addr,
                        route.next_hop,
                        route.next_hop_addr,
                        route.iface_addr,
                        route.cost
                    );
                }
            }
            DumpTable::Lsa => {
                println!("**************** LSA DUMP ********************");
                for (node, entry) in self.lsr.topology() {
                    let neighbors: Vec<String> = entry
                        .neighbor_addrs
                        .iter()
                        .map(|a| a.to_string())
                        .collect();
                    println!("{node}\tseq {}\t[{}]", entry.lsp_seq, neighbors.join(", "));
                }
            }
        }
    }

    /// Perform engine output in order. An action may produce follow-on
    /// work (an upcall into the search layer, a lookup into the ring);
    /// that work joins the back of the queue.
    async fn drain(&mut self, works: Vec<Work>) -> anyhow::Result<()> {
        let mut queue: VecDeque<Work> = works.into();
        while let Some(work) = queue.pop_front() {
            match work {
                Work::Lsr(action) => self.perform_lsr(action).await?,
                Work::Chord(action) => self.perform_chord(action, &mut queue).await?,
                Work::Search(action) => self.perform_search(action, &mut queue).await?,
            }
        }
        Ok(())
    }

    async fn perform_lsr(&mut self, action: LsrAction) -> anyhow::Result<()> {
        match action {
            LsrAction::Broadcast { scope, message } => {
                let bytes = message.encode();
                for (index, iface) in self.interfaces.iter().enumerate() {
                    let included = match scope {
                        BroadcastScope::All => true,
                        BroadcastScope::Only(only) => index == only,
                        BroadcastScope::Except(except) => index != except,
                    };
                    if !included {
                        continue;
                    }
                    self.ls_sockets[index]
                        .send_to(&bytes, (iface.broadcast(), self.protocol.ls_port))
                        .await?;
                }
            }
            LsrAction::Unicast { dest, message } => {
                let socket = self.ls_socket_toward(dest);
                socket
                    .send_to(&message.encode(), (dest, self.protocol.ls_port))
                    .await?;
            }
            LsrAction::PingSuccess { dest, msg } => {
                println!(
                    "PING_RSP from node {} ({dest}): {msg}",
                    self.directory.label(dest)
                );
            }
            LsrAction::PingFailure { dest, msg } => {
                println!(
                    "ping to node {} ({dest}) failed: {msg}",
                    self.directory.label(dest)
                );
            }
            LsrAction::PingReceived { from, msg } => {
                println!(
                    "PING_REQ from node {} ({from}): {msg}",
                    self.directory.label(from)
                );
            }
        }
        Ok(())
    }

    /// Unicasts leave through the interface facing the next hop when we
    /// know it, else the first socket.
    fn ls_socket_toward(&self, dest: Ipv4Addr) -> &UdpSocket {
        let iface_addr = self
            .lsr
            .neighbors()
            .values()
            .find(|n| n.neighbor_addr == dest)
            .map(|n| n.iface_addr);
        let index = iface_addr
            .and_then(|addr| self.interfaces.iter().position(|i| i.addr == addr))
            .unwrap_or(0);
        &self.ls_sockets[index]
    }

    async fn perform_chord(
        &mut self,
        action: ChordAction,
        queue: &mut VecDeque<Work>,
    ) -> anyhow::Result<()> {
        match action {
            ChordAction::Send { dest, message } => {
                self.app_socket
                    .send_to(&message.encode(), (dest, self.protocol.app_port))
                    .await?;
            }
            ChordAction::Upcall(upcall) => {
                let actions = match upcall {
                    SearchUpcall::LookupResult {
                        flag,
                        key,
                        responsible,
                        txn,
                    } => self.search.on_lookup_result(flag, &key, responsible, txn),
                    SearchUpcall::JoinNotify { peer, .. } => self.search.on_join_notify(peer),
                    SearchUpcall::LeaveNotify { successor, .. } => {
                        self.search.on_leave_notify(successor)
                    }
                };
                queue.extend(actions.into_iter().map(Work::Search));
            }
            ChordAction::Report(report) => self.print_ring_report(&report),
            ChordAction::PingSuccess { dest, msg } => {
                println!(
                    "PING_RSP from node {} ({dest}): {msg}",
                    self.directory.label(dest)
                );
            }
            ChordAction::PingFailure { dest, msg } => {
                println!(
                    "ping to node {} ({dest}) failed: {msg}",
                    self.directory.label(dest)
                );
            }
            ChordAction::PingReceived { from, msg } => {
                println!(
                    "PING_REQ from node {} ({from}): {msg}",
                    self.directory.label(from)
                );
            }
        }
        Ok(())
    }

    async fn perform_search(
        &mut self,
        action: SearchAction,
        queue: &mut VecDeque<Work>,
    ) -> anyhow::Result<()> {
        match action {
            SearchAction::Send { dest, message } => {
                self.search_socket
                    .send_to(&message.encode(), (dest, self.protocol.search_port))
                    .await?;
            }
            SearchAction::Lookup { key, flag, txn } => {
                match self.chord.lookup(&key, flag, txn, &mut self.metrics) {
                    Ok(actions) => queue.extend(actions.into_iter().map(Work::Chord)),
                    Err(e) => {
                        println!("error: {e}");
                        self.search.abort(txn);
                    }
                }
            }
            SearchAction::Result { terms, docs } => {
                if docs.is_empty() {
                    println!("SearchResults<{}> -> no matches", terms.join(" AND "));
                } else {
                    println!("SearchResults<{}> -> {}", terms.join(" AND "), docs.join(", "));
                }
            }
        }
        Ok(())
    }

    fn print_ring_report(&self, report: &RingReport) {
        println!("------------------------- RING STATE -------------------------");
        println!("Current     {}", self.fmt_peer(Some(report.local)));
        println!("Successor   {}", self.fmt_peer(report.successor));
        println!("Predecessor {}", self.fmt_peer(report.predecessor));
    }

    fn fmt_peer(&self, peer: Option<Peer>) -> String {
        match peer {
            Some(peer) => format!(
                "node {:<8} IP {:<15} ID {}",
                self.directory.label(peer.addr),
                peer.addr,
                peer.id
            ),
            None => "none".to_string(),
        }
    }
}

fn spawn_reader(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<Event>,
    make: impl Fn(SocketAddr, Vec<u8>) -> Event + Send + 'static,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    if tx.send(make(from, buf[..len].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%e, "socket read failed");
                    break;
                }
            }
        }
    });
}

fn spawn_stdin(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(Event::Command(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = tx.send(Event::Shutdown).await;
                    break;
                }
            }
        }
    });
}

fn spawn_ctrl_c(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(Event::Shutdown).await;
        }
    });
}
