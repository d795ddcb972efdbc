//! Scenario: 4-node line A-B-C-D.
//!
//! After neighbor discovery converges, A reaches D at cost 3 through B.
//! Cutting the B-C link makes B and C re-advertise within a probing round
//! of detecting it, and A's entry for D disappears.

use strata_integration_tests::SimNet;
use strata_lsr::RouteDecision;

const LINE: &[(u32, u32)] = &[(1, 2), (2, 3), (3, 4)];

/// Two probing rounds: one to hear neighbors, one to commit and flood.
fn converge(net: &mut SimNet) {
    net.nd_round();
    net.nd_round();
}

#[test]
fn line_converges_to_shortest_paths() {
    let mut net = SimNet::new(4, LINE);
    converge(&mut net);

    let a = &net.nodes[&1].lsr;
    let routes = a.routes();
    assert_eq!(routes[&2].cost, 1);
    assert_eq!(routes[&3].cost, 2);
    assert_eq!(routes[&4].cost, 3);
    assert_eq!(routes[&4].next_hop, 2, "A reaches D through B");

    // Interior node B sees both directions.
    let b = &net.nodes[&2].lsr;
    assert_eq!(b.routes()[&1].cost, 1);
    assert_eq!(b.routes()[&4].cost, 2);

    // The forwarding hooks agree with the table.
    let via = a.route_output(std::net::Ipv4Addr::new(10, 0, 0, 4)).expect("route to D");
    assert_eq!(via.next_hop_addr, std::net::Ipv4Addr::new(10, 0, 0, 2));
    assert!(matches!(
        a.route_input(
            std::net::Ipv4Addr::new(10, 0, 0, 4),
            std::net::Ipv4Addr::new(10, 0, 0, 3),
        ),
        RouteDecision::Forward { .. }
    ));
}

#[test]
fn every_pair_is_mutually_reachable() {
    let mut net = SimNet::new(4, LINE);
    converge(&mut net);
    for src in 1..=4u32 {
        for dst in 1..=4u32 {
            if src == dst {
                continue;
            }
            assert!(
                net.nodes[&src].lsr.routes().contains_key(&dst),
                "{src} cannot reach {dst}"
            );
        }
    }
}

#[test]
fn broken_link_removes_far_destinations() {
    let mut net = SimNet::new(4, LINE);
    converge(&mut net);
    assert!(net.nodes[&1].lsr.routes().contains_key(&4));

    net.break_link(2, 3);
    // One round to notice the silent neighbor, one to flood the change.
    net.nd_round();
    net.nd_round();

    let a_routes = net.nodes[&1].lsr.routes();
    assert!(a_routes.contains_key(&2), "A still reaches B");
    assert!(!a_routes.contains_key(&3), "C unreachable after the cut");
    assert!(!a_routes.contains_key(&4), "D unreachable after the cut");

    let d_routes = net.nodes[&4].lsr.routes();
    assert!(d_routes.contains_key(&3), "D still reaches C");
    assert!(!d_routes.contains_key(&1), "A unreachable from D");
}

#[test]
fn routed_ping_crosses_the_line() {
    let mut net = SimNet::new(4, LINE);
    converge(&mut net);

    // PING 4 from node 1: request routed A->B->C->D, response back.
    net.ping(1, 4, "end to end");

    assert!(
        net.ping_log
            .iter()
            .any(|(node, line)| *node == 4 && line.starts_with("received")),
        "D saw the request"
    );
    assert!(
        net.ping_log
            .iter()
            .any(|(node, line)| *node == 1 && line.starts_with("success")),
        "A saw the response"
    );
}
