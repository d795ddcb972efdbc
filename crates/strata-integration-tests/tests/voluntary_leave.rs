//! Scenario: voluntary leave from a 3-node ring.
//!
//! The departing node repairs both neighbors directly, so the ring closes
//! again without waiting for a stabilize round, and hands its posting
//! lists to its successor on the way out.

use strata_chord::ChordStatus;
use strata_integration_tests::SimNet;
use strata_types::RingId;

fn three_node_ring() -> SimNet {
    let mut net = SimNet::ring_only(3);
    net.join(1, 1);
    for joiner in 2..=3 {
        net.join(joiner, 1);
        net.stabilize_round();
        net.stabilize_round();
    }
    net.assert_ring();
    net.fix_finger_round();
    net
}

#[test]
fn leave_repairs_ring_without_stabilize() {
    let mut net = three_node_ring();
    net.leave(2);

    assert_eq!(net.nodes[&2].chord.status(), ChordStatus::Detached);
    assert!(net.nodes[&2].chord.fingers().is_empty());
    assert_eq!(net.ring_members(), vec![1, 3]);
    // Deliberately no stabilize round here: LEAVE_SUCCESSOR and
    // LEAVE_PREDECESSOR alone must close the ring.
    net.assert_ring();
}

#[test]
fn leave_to_a_single_node_ring() {
    let mut net = SimNet::ring_only(2);
    net.join(1, 1);
    net.join(2, 1);
    net.stabilize_round();
    net.assert_ring();

    net.leave(1);
    assert_eq!(net.ring_members(), vec![2]);
    net.assert_ring();
    let survivor = &net.nodes[&2].chord;
    assert_eq!(
        survivor.successor().map(|s| s.addr),
        Some(std::net::Ipv4Addr::new(10, 0, 0, 2)),
        "alone again: own successor"
    );
    assert_eq!(survivor.predecessor(), None);
}

#[test]
fn last_member_leave_detaches() {
    let mut net = SimNet::ring_only(1);
    net.join(1, 1);
    net.leave(1);
    assert!(net.ring_members().is_empty());
}

#[test]
fn leave_hands_keys_to_the_successor() {
    let mut net = three_node_ring();

    // Find a term the middle node owns, so the handoff actually moves it.
    let term = (0..200)
        .map(|i| format!("term{i}"))
        .find(|t| net.owner_of(RingId::of_key(t)) == 2)
        .expect("some term hashes to node 2");
    net.publish(1, "DocX", &[term.as_str()]);
    assert!(net.nodes[&2].search.index().contains_key(&term));

    net.leave(2);
    assert!(
        net.nodes[&2].search.index().is_empty(),
        "departing node keeps nothing"
    );

    // Let the survivors repair fingers, then search from each of them.
    net.stabilize_round();
    net.fix_finger_round();
    for node in [1u32, 3] {
        net.search(node, &[term.as_str()]);
        let hit = net
            .search_results
            .iter()
            .any(|(n, _, docs)| *n == node && docs == &vec!["DocX".to_string()]);
        assert!(hit, "node {node} still finds the handed-off posting");
    }
}
