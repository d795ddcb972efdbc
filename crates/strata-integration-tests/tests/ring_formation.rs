//! Scenario: landmark plus two joiners.
//!
//! Node 1 creates the ring, nodes 2 and 3 join through it. After one
//! stabilize round every successor pointer is correct, a walk visits all
//! three members in id order, and a ring walk terminates back at its
//! initiator.

use strata_chord::ChordStatus;
use strata_integration_tests::SimNet;

#[test]
fn landmark_and_two_joiners_form_a_ring() {
    let mut net = SimNet::ring_only(3);
    net.join(1, 1);
    assert_eq!(net.ring_members(), vec![1]);

    net.join(2, 1);
    net.stabilize_round();
    net.assert_ring();
    assert_eq!(net.ring_members(), vec![1, 2]);

    net.join(3, 1);
    net.stabilize_round();
    net.assert_ring();
    assert_eq!(net.ring_members(), vec![1, 2, 3]);
}

#[test]
fn joining_through_a_non_landmark_works_too() {
    let mut net = SimNet::ring_only(3);
    net.join(1, 1);
    net.join(2, 1);
    net.stabilize_round();
    net.join(3, 2);
    net.stabilize_round();
    net.assert_ring();
    assert_eq!(net.ring_members(), vec![1, 2, 3]);
}

#[test]
fn join_through_detached_contact_is_refused() {
    let mut net = SimNet::ring_only(2);
    // Node 2 never created or joined a ring; node 1's request is refused.
    net.join(1, 2);
    assert_eq!(
        net.nodes[&1].chord.status(),
        ChordStatus::Detached,
        "refused joiner stays detached"
    );
    assert!(net.ring_members().is_empty());
}

#[test]
fn stabilization_is_stable_once_converged() {
    let mut net = SimNet::ring_only(3);
    net.join(1, 1);
    net.join(2, 1);
    net.stabilize_round();
    net.join(3, 1);
    net.stabilize_round();
    net.assert_ring();

    let pointers_before: Vec<_> = net
        .nodes
        .values()
        .map(|n| (n.chord.successor(), n.chord.predecessor()))
        .collect();
    for _ in 0..3 {
        net.stabilize_round();
    }
    let pointers_after: Vec<_> = net
        .nodes
        .values()
        .map(|n| (n.chord.successor(), n.chord.predecessor()))
        .collect();
    assert_eq!(pointers_before, pointers_after, "quiescent ring stays put");
    net.assert_ring();
}

#[test]
fn ring_walk_reports_every_member_once() {
    let mut net = SimNet::ring_only(3);
    net.join(1, 1);
    net.join(2, 1);
    net.stabilize_round();
    net.join(3, 1);
    net.stabilize_round();

    net.ringstate(2);
    // The initiator prints itself, then each other member prints once as
    // the walk passes through; the walk stops back at the initiator.
    let reporters: Vec<u32> = net.reports.iter().map(|(n, _)| *n).collect();
    assert_eq!(reporters.len(), 3);
    assert_eq!(reporters[0], 2, "initiator reports first");
    let mut sorted = reporters.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2, 3]);
}
